use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use object_store::path::Path;
use std::time::Duration;

pub const UPLOAD_PREFIX: &str = "uploaded/";
pub const PARSED_PREFIX: &str = "parsed/";
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Issues short-lived, write-only upload locations.
#[async_trait]
pub trait UploadSigner: Send + Sync {
    async fn presign_put(&self, path: &Path, expires_in: Duration) -> Result<String>;
}

/// Presigns `PutObject` with `Content-Type: text/csv` among the signed
/// headers, so an upload with any other content type is refused by S3.
pub struct S3UploadSigner {
    client: Client,
    bucket: String,
}

impl S3UploadSigner {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Credentials come from the standard AWS provider chain. A custom
    /// endpoint (MinIO) switches to path-style addressing.
    pub async fn from_env(bucket: String, region: String, endpoint_url: Option<String>) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(url) = endpoint_url {
            s3_config = s3_config.endpoint_url(url).force_path_style(true);
        }
        Self::new(Client::from_conf(s3_config.build()), bucket)
    }
}

#[async_trait]
impl UploadSigner for S3UploadSigner {
    async fn presign_put(&self, path: &Path, expires_in: Duration) -> Result<String> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path.to_string())
            .content_type(CSV_CONTENT_TYPE)
            .presigned(PresigningConfig::expires_in(expires_in)?)
            .await?;
        Ok(presigned.uri().to_string())
    }
}

/// Object path an upload named `file_name` lands on.
pub fn upload_path(file_name: &str) -> Result<Path, object_store::path::Error> {
    Path::parse(format!("{UPLOAD_PREFIX}{file_name}"))
}

/// Maps `uploaded/<rest>` to `parsed/<rest>`. Keys outside the upload prefix
/// have no parsed counterpart.
pub fn parsed_key(key: &str) -> Option<String> {
    key.strip_prefix(UPLOAD_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(|rest| format!("{PARSED_PREFIX}{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::Credentials;

    fn signer() -> S3UploadSigner {
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-2"))
            .credentials_provider(Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI", None, None, "static"))
            .build();
        S3UploadSigner::new(Client::from_conf(config), "bucket-for-files-import".to_string())
    }

    fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
        let (_, query) = url.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
    }

    #[tokio::test]
    async fn presigned_put_signs_the_csv_content_type() {
        let path = upload_path("products.csv").unwrap();
        let url = signer()
            .presign_put(&path, Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.contains("/uploaded/products.csv?"), "{url}");
        assert_eq!(query_param(&url, "X-Amz-Expires"), Some("3600"));

        let signed_headers = query_param(&url, "X-Amz-SignedHeaders").unwrap().to_ascii_lowercase();
        assert!(signed_headers.contains("content-type"), "{signed_headers}");
        assert!(signed_headers.contains("host"), "{signed_headers}");
    }

    #[test]
    fn parsed_key_swaps_prefix_only() {
        assert_eq!(parsed_key("uploaded/test.csv").as_deref(), Some("parsed/test.csv"));
        assert_eq!(
            parsed_key("uploaded/nested/uploaded/a.csv").as_deref(),
            Some("parsed/nested/uploaded/a.csv")
        );
    }

    #[test]
    fn parsed_key_ignores_other_prefixes() {
        assert_eq!(parsed_key("parsed/test.csv"), None);
        assert_eq!(parsed_key("uploaded/"), None);
        assert_eq!(parsed_key("test.csv"), None);
    }

    #[test]
    fn upload_path_rejects_traversal() {
        assert_eq!(upload_path("products.csv").unwrap().as_ref(), "uploaded/products.csv");
        assert!(upload_path("../secrets.csv").is_err());
    }
}
