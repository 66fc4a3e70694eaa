/// Credentials obtained for an account from the accounts service.
///
/// `None` means the account was never authenticated, or the last attempt
/// failed. Replacement is atomic: the daemon swaps the whole value after an
/// authentication attempt completes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    None,
    OAuth1 {
        consumer_key: String,
        consumer_secret: String,
        token: String,
        token_secret: String,
    },
    OAuth2 {
        access_token: String,
    },
    Password {
        username: String,
        password: String,
        host: String,
    },
}

impl Credentials {
    pub fn is_none(&self) -> bool {
        matches!(self, Credentials::None)
    }
}
