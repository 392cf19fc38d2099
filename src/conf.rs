use std::{
    fmt::Debug,
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, LazyLock},
};

use anyhow::Context;

pub static GLOBAL: LazyLock<Arc<Conf>> = LazyLock::new(|| {
    let conf = read_or_create_default().unwrap_or_else(|error| {
        panic!("Failed to initialize global config: {error:?}")
    });
    Arc::new(conf)
});

#[must_use]
pub fn global() -> Arc<Conf> {
    (*GLOBAL).clone()
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Conf {
    #[serde(
        serialize_with = "serialize_log_level",
        deserialize_with = "deserialize_log_level"
    )]
    pub log_level: tracing::Level,
    pub addr: IpAddr,
    pub port: u16,
    pub jwt: Jwt,
    /// Database file, relative to the working directory unless absolute.
    pub db_file: PathBuf,
    pub sqlite_busy_timeout: f32,
    pub cors_origins: Vec<String>,
    pub tls: Option<Tls>,
    pub ip_blocklist: Option<IpBlocklist>,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            addr: "127.0.0.1".parse().unwrap_or_else(|_| {
                unreachable!("Fat-fingered default IP address!")
            }),
            port: 3001,
            jwt: Jwt::default(),
            db_file: PathBuf::from("data/data.db"),
            sqlite_busy_timeout: 60.0,
            cors_origins: Vec::new(),
            tls: None,
            ip_blocklist: None,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Tls {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
pub struct Jwt {
    pub secret: String,
    pub audience: String,
    pub issuer: String,
}

impl Default for Jwt {
    fn default() -> Self {
        Self {
            secret: "super-secret".to_string(),
            audience: "authenticated".to_string(),
            issuer: "tracelens".to_string(),
        }
    }
}

impl Debug for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwt")
            .field("secret", &"<XXXXX>")
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// Where the per-request IP blocklist comes from. Leaving the whole table
/// out of the config file disables blocking.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum IpBlocklist {
    Static { ips: Vec<String> },
    Remote { url: String, timeout: f32 },
}

fn serialize_log_level<S>(
    level: &tracing::Level,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let s = level.to_string();
    serializer.serialize_str(&s)
}

fn deserialize_log_level<'de, D>(
    deserializer: D,
) -> Result<tracing::Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    let s = String::deserialize(deserializer)?;
    tracing::Level::from_str(&s).map_err(serde::de::Error::custom)
}

pub fn read_or_create_default() -> anyhow::Result<Conf> {
    let path = "conf/conf.toml";
    read_or_create_default_(path).context(path)
}

pub fn read_or_create_default_<P: AsRef<Path>>(
    path: P,
) -> anyhow::Result<Conf> {
    let path = path.as_ref();
    let conf = if fs::exists(path)? {
        let s = fs::read_to_string(path)?;
        toml::from_str(&s)?
    } else {
        if let Some(parent) = path.parent() {
            let ctx = format!(
                "Failed to create parent directory \
                for conf file: {path:?}"
            );
            fs::create_dir_all(parent).context(ctx)?;
        }
        let conf = Conf::default();
        let s = toml::to_string_pretty(&conf)?;
        fs::write(path, s)?;
        conf
    };
    Ok(conf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_written_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("conf.toml");
        let written = read_or_create_default_(&path).unwrap();
        assert!(path.exists());
        let read = read_or_create_default_(&path).unwrap();
        assert_eq!(written.port, read.port);
        assert_eq!(read.log_level, tracing::Level::INFO);
        assert!(read.ip_blocklist.is_none());
    }

    #[test]
    fn blocklist_table_parses() {
        let toml_str = r#"
            log_level = "DEBUG"
            addr = "0.0.0.0"
            port = 8080
            db_file = "db.sqlite"
            sqlite_busy_timeout = 5.0
            cors_origins = []

            [jwt]
            secret = "s"
            audience = "a"
            issuer = "i"

            [ip_blocklist]
            source = "static"
            ips = ["10.0.0.1"]
        "#;
        let conf: Conf = toml::from_str(toml_str).unwrap();
        assert_eq!(conf.log_level, tracing::Level::DEBUG);
        assert_eq!(
            conf.ip_blocklist,
            Some(IpBlocklist::Static {
                ips: vec!["10.0.0.1".to_string()]
            })
        );
    }

    #[test]
    fn jwt_secret_is_redacted() {
        let dbg = format!("{:?}", Jwt::default());
        assert!(!dbg.contains("super-secret"));
    }
}
