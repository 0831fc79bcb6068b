//! Object-storage addressing and credential resolution.
//!
//! URIs take the form `provider://bucket/key`. Credentials are never
//! embedded in the URI; they are resolved per provider+bucket from
//! environment variables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported object-storage providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    Tos,
    Ks3,
    Oss,
    Cos,
}

impl StorageProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Tos => "tos",
            Self::Ks3 => "ks3",
            Self::Oss => "oss",
            Self::Cos => "cos",
        }
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("invalid remote uri '{0}': expected provider://bucket/key")]
    Malformed(String),
    #[error("unsupported storage provider '{0}'")]
    UnknownProvider(String),
}

impl FromStr for StorageProvider {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(Self::S3),
            "tos" => Ok(Self::Tos),
            "ks3" => Ok(Self::Ks3),
            "oss" => Ok(Self::Oss),
            "cos" => Ok(Self::Cos),
            other => Err(UriError::UnknownProvider(other.to_string())),
        }
    }
}

/// A parsed `provider://bucket/key` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteUri {
    pub provider: StorageProvider,
    pub bucket: String,
    pub key: String,
}

impl FromStr for RemoteUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((provider, rest)) = s.split_once("://") else {
            return Err(UriError::Malformed(s.to_string()));
        };
        let provider: StorageProvider = provider.parse()?;
        let Some((bucket, key)) = rest.split_once('/') else {
            return Err(UriError::Malformed(s.to_string()));
        };
        let key = key.trim_start_matches('/');
        if bucket.is_empty() || key.is_empty() {
            return Err(UriError::Malformed(s.to_string()));
        }
        Ok(Self {
            provider,
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for RemoteUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.provider.as_str(), self.bucket, self.key)
    }
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error(
        "no credentials for {provider}://{bucket}; set {prefix}_ENDPOINT, \
         {prefix}_ACCESS_KEY and {prefix}_SECRET_KEY ({prefix}_REGION optional)"
    )]
    Missing {
        provider: &'static str,
        bucket: String,
        prefix: String,
    },
}

/// Connection credentials for one provider+bucket pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

impl StorageCredentials {
    /// Resolve credentials from `{PROVIDER}_{BUCKET}_*` environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns an error naming the expected variables when any required
    /// one is unset.
    pub fn from_env(
        provider: StorageProvider,
        bucket: &str,
    ) -> Result<Self, CredentialsError> {
        let prefix = format!(
            "{}_{}",
            provider.as_str().to_uppercase(),
            bucket.to_uppercase().replace('-', "_")
        );
        let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).ok();

        match (var("ENDPOINT"), var("ACCESS_KEY"), var("SECRET_KEY")) {
            (Some(endpoint), Some(access_key), Some(secret_key)) => Ok(Self {
                endpoint,
                access_key,
                secret_key,
                region: var("REGION"),
            }),
            _ => Err(CredentialsError::Missing {
                provider: provider.as_str(),
                bucket: bucket.to_string(),
                prefix,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        let uri: RemoteUri = "tos://conda-envs/teams/maps/env-v1.zst".parse().unwrap();
        assert_eq!(uri.provider, StorageProvider::Tos);
        assert_eq!(uri.bucket, "conda-envs");
        assert_eq!(uri.key, "teams/maps/env-v1.zst");
    }

    #[test]
    fn test_display_roundtrip() {
        let raw = "s3://bucket/path/to/key";
        let uri: RemoteUri = raw.parse().unwrap();
        assert_eq!(uri.to_string(), raw);
    }

    #[test]
    fn test_missing_scheme_is_malformed() {
        let err = "bucket/key".parse::<RemoteUri>().unwrap_err();
        assert!(matches!(err, UriError::Malformed(_)));
    }

    #[test]
    fn test_unknown_provider() {
        let err = "gcs://bucket/key".parse::<RemoteUri>().unwrap_err();
        assert_eq!(err, UriError::UnknownProvider("gcs".to_string()));
    }

    #[test]
    fn test_empty_key_is_malformed() {
        let err = "s3://bucket".parse::<RemoteUri>().unwrap_err();
        assert!(matches!(err, UriError::Malformed(_)));
        let err = "s3://bucket/".parse::<RemoteUri>().unwrap_err();
        assert!(matches!(err, UriError::Malformed(_)));
    }

    #[test]
    fn test_leading_slashes_stripped_from_key() {
        let uri: RemoteUri = "oss://bucket//double/slash".parse().unwrap();
        assert_eq!(uri.key, "double/slash");
    }

    #[test]
    fn test_credentials_from_env() {
        std::env::set_var("KS3_CRED_TEST_ENDPOINT", "https://ks3.example.com");
        std::env::set_var("KS3_CRED_TEST_ACCESS_KEY", "ak");
        std::env::set_var("KS3_CRED_TEST_SECRET_KEY", "sk");
        let creds = StorageCredentials::from_env(StorageProvider::Ks3, "cred-test").unwrap();
        assert_eq!(creds.endpoint, "https://ks3.example.com");
        assert_eq!(creds.region, None);
        std::env::remove_var("KS3_CRED_TEST_ENDPOINT");
        std::env::remove_var("KS3_CRED_TEST_ACCESS_KEY");
        std::env::remove_var("KS3_CRED_TEST_SECRET_KEY");
    }

    #[test]
    fn test_credentials_missing_names_vars() {
        let err =
            StorageCredentials::from_env(StorageProvider::Cos, "definitely-unset").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("COS_DEFINITELY_UNSET_ENDPOINT"));
        assert!(msg.contains("ACCESS_KEY"));
    }
}
