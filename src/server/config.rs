//! Server configuration

use std::net::SocketAddr;

/// Signed-expiry token authentication settings.
///
/// An empty secret disables verification entirely, even when the play or
/// publish gates are switched on.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Require a valid token to play a stream.
    pub play: bool,
    /// Require a valid token to publish a stream.
    pub publish: bool,
    /// Shared secret for the `{expiry}-{hex_md5(path-expiry-secret)}` token.
    pub secret: String,
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the RTMP listener binds to
    pub bind_addr: SocketAddr,

    /// Enable TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,

    /// Authentication settings
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1935".parse().expect("static bind address"),
            tcp_nodelay: true,
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set authentication settings
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 1935);
        assert!(!config.auth.play);
        assert!(!config.auth.publish);
        assert!(config.auth.secret.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::default()
            .bind("127.0.0.1:2935".parse().unwrap())
            .auth(AuthConfig {
                play: true,
                publish: true,
                secret: "s3cret".into(),
            });
        assert_eq!(config.bind_addr.port(), 2935);
        assert!(config.auth.publish);
    }
}
