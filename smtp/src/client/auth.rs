use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::command::Command;
use crate::error::{Error, Result};

use super::{ClientAuthenticated, ClientUnauthenticated};

#[async_trait]
pub trait Auth {
    /// Performs authentication, consuming the client
    async fn perform_auth(self, client: ClientUnauthenticated) -> Result<ClientAuthenticated>;

    fn convert_client(client: ClientUnauthenticated) -> ClientAuthenticated {
        match client {
            ClientUnauthenticated::Encrypted(e) => ClientAuthenticated::Encrypted(e),
            ClientUnauthenticated::Unencrypted(e) => ClientAuthenticated::Unencrypted(e),
        }
    }
}

/// SASL PLAIN (RFC 4616), sent as an initial response.
pub struct Plain {
    pub username: String,
    pub password: String,
}

#[async_trait]
impl Auth for Plain {
    async fn perform_auth(self, mut client: ClientUnauthenticated) -> Result<ClientAuthenticated> {
        let token = STANDARD.encode(format!("\0{}\0{}", self.username, self.password));
        let reply = client.execute(Command::AuthPlain(token)).await?;
        if reply.code != 235 {
            return Err(Error::AuthFailed(reply));
        }
        Ok(<Self as Auth>::convert_client(client))
    }
}

/// The LOGIN mechanism: username and password each answer a 334 challenge.
pub struct Login {
    pub username: String,
    pub password: String,
}

#[async_trait]
impl Auth for Login {
    async fn perform_auth(self, mut client: ClientUnauthenticated) -> Result<ClientAuthenticated> {
        let steps = vec![
            Command::AuthLogin,
            Command::AuthResponse(STANDARD.encode(&self.username)),
            Command::AuthResponse(STANDARD.encode(&self.password)),
        ];
        let last = steps.len() - 1;

        for (i, step) in steps.into_iter().enumerate() {
            let reply = client.execute(step).await?;
            let expected = if i == last { 235 } else { 334 };
            if reply.code != expected {
                return Err(Error::AuthFailed(reply));
            }
        }

        Ok(<Self as Auth>::convert_client(client))
    }
}

/// Password login using whichever mechanism the server advertises, preferring PLAIN.
pub struct Password {
    pub username: String,
    pub password: String,
}

#[async_trait]
impl Auth for Password {
    async fn perform_auth(self, client: ClientUnauthenticated) -> Result<ClientAuthenticated> {
        let Password { username, password } = self;
        let extensions = client.extensions();

        if extensions.supports_auth("PLAIN") {
            debug!("authenticating with PLAIN");
            Plain { username, password }.perform_auth(client).await
        } else if extensions.supports_auth("LOGIN") {
            debug!("authenticating with LOGIN");
            Login { username, password }.perform_auth(client).await
        } else {
            Err(Error::NoAuthMechanism(extensions.auth_mechanisms()))
        }
    }
}
