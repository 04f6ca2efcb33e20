use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

/// Registry connection settings shared by every remote operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryOptions {
    /// Plain HTTP and unverified TLS certificates.
    pub insecure: bool,
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
}

impl RegistryOptions {
    pub fn new(insecure: bool, username: Option<String>, password: Option<String>) -> Self {
        Self {
            insecure,
            username: username.filter(|u| !u.is_empty()),
            password: password.filter(|p| !p.is_empty()),
        }
    }

    /// Username and password when both are set; anonymous otherwise.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Replace the identity with a base64 `user:password` pair, the format
    /// docker keeps in the `auth` field of its config file.
    pub fn with_auth(self, auth: Option<&str>) -> Result<Self> {
        match auth.filter(|a| !a.is_empty()) {
            Some(encoded) => {
                let (user, pass) = decode_auth(encoded)?;
                Ok(Self::new(self.insecure, Some(user), Some(pass)))
            }
            None => Ok(self),
        }
    }

    /// Same transport settings with a different identity.
    pub fn with_credentials(&self, username: Option<String>, password: Option<String>) -> Self {
        if username.is_none() && password.is_none() {
            return self.clone();
        }
        Self::new(self.insecure, username, password)
    }
}

pub fn decode_auth(encoded: &str) -> Result<(String, String)> {
    let decoded = STANDARD
        .decode(encoded.trim())
        .context("--auth is not valid base64")?;
    let decoded = String::from_utf8(decoded).context("--auth is not valid UTF-8")?;
    let Some((user, pass)) = decoded.split_once(':') else {
        bail!("--auth must encode 'username:password'");
    };
    Ok((user.to_string(), pass.to_string()))
}

/// Settings for one invocation, built from flags and environment in `main`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppConfig {
    /// `--json` destination: `-` for stdout, otherwise a file path.
    pub json: Option<String>,
    pub registry: RegistryOptions,
}

impl AppConfig {
    pub fn wants_json(&self) -> bool {
        self.json.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_need_both_halves() {
        let opts = RegistryOptions::new(false, Some("bob".into()), None);
        assert!(opts.credentials().is_none());

        let opts = RegistryOptions::new(false, Some("bob".into()), Some("".into()));
        assert!(opts.credentials().is_none());

        let opts = RegistryOptions::new(true, Some("bob".into()), Some("s3cret".into()));
        assert_eq!(opts.credentials(), Some(("bob", "s3cret")));
    }

    #[test]
    fn override_keeps_transport() {
        let src = RegistryOptions::new(true, Some("a".into()), Some("1".into()));
        let dst = src.with_credentials(Some("b".into()), Some("2".into()));
        assert!(dst.insecure);
        assert_eq!(dst.credentials(), Some(("b", "2")));

        let same = src.with_credentials(None, None);
        assert_eq!(same.credentials(), Some(("a", "1")));
    }

    #[test]
    fn auth_pair_replaces_username_and_password() {
        // "robot:t0k:en"
        let opts = RegistryOptions::new(true, Some("bob".into()), Some("s3cret".into()))
            .with_auth(Some("cm9ib3Q6dDBrOmVu"))
            .unwrap();
        assert!(opts.insecure);
        assert_eq!(opts.credentials(), Some(("robot", "t0k:en")));

        let untouched = RegistryOptions::new(false, Some("bob".into()), Some("s3cret".into()))
            .with_auth(None)
            .unwrap();
        assert_eq!(untouched.credentials(), Some(("bob", "s3cret")));
    }

    #[test]
    fn malformed_auth_is_an_error() {
        assert!(decode_auth("not base64!").is_err());
        // "nocolon"
        assert!(decode_auth("bm9jb2xvbg==").is_err());
    }

    #[test]
    fn password_is_not_serialized() {
        let opts = RegistryOptions::new(false, Some("bob".into()), Some("s3cret".into()));
        let json = serde_json::to_string(&opts).unwrap();
        assert!(!json.contains("s3cret"));
    }
}
