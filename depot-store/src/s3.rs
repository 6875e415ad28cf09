//! S3-compatible replica client built on aws-sdk-s3.
//!
//! Replicas are usually MinIO-style deployments, so the client always uses
//! path-style addressing and static credentials, and assumes plain http
//! when the configured host carries no scheme.

use std::time::SystemTime;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::DateTime as AwsDateTime;
use aws_sdk_s3::Client;
use aws_smithy_runtime_api::box_error::BoxError;
use aws_smithy_runtime_api::client::interceptors::context::BeforeTransmitInterceptorContextMut;
use aws_smithy_runtime_api::client::interceptors::Intercept;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_types::config_bag::ConfigBag;
use aws_smithy_types::error::display::DisplayErrorContext;
use chrono::{DateTime, Utc};

use depot_core::ReplicaConfig;

use crate::error::StoreError;
use crate::object::{ObjectInfo, ObjectReader, ObjectStore};

/// Signing region for endpoints that do not care about one (MinIO accepts
/// any region as long as the request is signed consistently).
const FALLBACK_REGION: &str = "us-east-1";

/// One bucket on one S3-compatible endpoint.
pub struct S3Store {
    client: Client,
    bucket: String,
    endpoint: String,
}

/// Rewrites the Host header before the request is signed, so the signature
/// covers the overridden value.
#[derive(Debug)]
struct HostHeaderOverride {
    host: String,
}

impl Intercept for HostHeaderOverride {
    fn name(&self) -> &'static str {
        "DepotHostHeaderOverride"
    }

    fn modify_before_signing(
        &self,
        context: &mut BeforeTransmitInterceptorContextMut<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        context
            .request_mut()
            .headers_mut()
            .insert("host", self.host.clone());
        Ok(())
    }
}

impl S3Store {
    /// Build a client for one replica.
    pub async fn connect(config: &ReplicaConfig) -> Result<Self, StoreError> {
        let credentials = Credentials::new(
            config.access_key.expose(),
            config.secret_key.expose(),
            None,
            None,
            "depot-config",
        );
        let endpoint = endpoint_url(&config.host);

        let base = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(FALLBACK_REGION))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base)
            .endpoint_url(&endpoint)
            .force_path_style(true);
        if let Some(host) = &config.custom_host_header {
            builder = builder.interceptor(HostHeaderOverride { host: host.clone() });
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            endpoint,
        })
    }

    fn backend_err(
        &self,
        op: &'static str,
        key: &str,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> StoreError {
        StoreError::Backend {
            endpoint: format!("{}/{}", self.endpoint, self.bucket),
            op,
            key: key.to_string(),
            message: format!("{}", DisplayErrorContext(&err)),
        }
    }
}

fn endpoint_url(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn to_utc(dt: &AwsDateTime) -> DateTime<Utc> {
    SystemTime::try_from(*dt)
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn stat(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match head {
            Ok(out) => Ok(ObjectInfo {
                key: key.to_string(),
                last_modified: out
                    .last_modified()
                    .map(to_utc)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            }),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => Err(self.backend_err("stat", key, err)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut objects = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| self.backend_err("list", prefix, e))?;
            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    last_modified: obj
                        .last_modified()
                        .map(to_utc)
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                });
            }
        }
        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<ObjectReader, StoreError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match object {
            Ok(out) => Ok(Box::pin(out.body.into_async_read())),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => Err(self.backend_err("get", key, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_http_scheme() {
        assert_eq!(endpoint_url("minio1:9000"), "http://minio1:9000");
        assert_eq!(endpoint_url("https://s3.internal"), "https://s3.internal");
    }

    #[test]
    fn aws_epoch_converts_to_utc() {
        let dt = AwsDateTime::from_secs(1_700_000_000);
        assert_eq!(to_utc(&dt).timestamp(), 1_700_000_000);
    }
}
