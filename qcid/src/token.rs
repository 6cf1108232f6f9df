use rand::Rng;

pub const RESET_TOKEN_SIZE: usize = 16;

/// The stateless reset token bound to a connection ID.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResetToken([u8; RESET_TOKEN_SIZE]);

impl ResetToken {
    pub fn new(bytes: [u8; RESET_TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn random_gen() -> Self {
        let mut bytes = [0; RESET_TOKEN_SIZE];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }
}

impl From<[u8; RESET_TOKEN_SIZE]> for ResetToken {
    fn from(bytes: [u8; RESET_TOKEN_SIZE]) -> Self {
        Self(bytes)
    }
}

impl std::ops::Deref for ResetToken {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
