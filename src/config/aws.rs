//! AWS SDK configuration
//!
//! This module provides AWS SDK configuration for the DynamoDB client,
//! supporting custom endpoints for local development and testing.

use aws_config::{meta::region::RegionProviderChain, AppName, BehaviorVersion, Region, SdkConfig};
use aws_sdk_dynamodb::Client as DynamoDbSdkClient;

use crate::config::Settings;

/// AWS configuration builder
///
/// Creates AWS SDK configuration with support for:
/// - Custom regions
/// - Client identification (SDK app name)
/// - Custom endpoint URLs for local testing
pub struct AwsConfigBuilder<'a> {
    settings: &'a Settings,
}

impl<'a> AwsConfigBuilder<'a> {
    /// Create a new AWS configuration builder
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Build the base AWS SDK configuration
    ///
    /// Region comes from settings, falling back to the default provider
    /// chain. The configured user agent string is attached as the app name
    /// when it is a valid one; otherwise it is skipped with a warning.
    pub async fn build_sdk_config(&self) -> SdkConfig {
        let region_provider = RegionProviderChain::first_try(Region::new(self.settings.aws_region.clone()))
            .or_default_provider();

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

        if let Some(app_name) = self.app_name() {
            loader = loader.app_name(app_name);
        }

        loader.load().await
    }

    fn app_name(&self) -> Option<AppName> {
        let user_agent = self.settings.user_agent.as_deref()?;
        match AppName::new(user_agent.to_string()) {
            Ok(app_name) => Some(app_name),
            Err(e) => {
                tracing::warn!(user_agent = %user_agent, error = %e, "Ignoring invalid user agent string");
                None
            }
        }
    }

    /// Endpoint the client is pointed at instead of the regional one, if any
    pub fn endpoint_override(&self) -> Option<&str> {
        self.settings
            .dynamodb_endpoint_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Create a DynamoDB client with optional custom endpoint
    ///
    /// If `DYNAMODB_ENDPOINT_URL` is set in settings, the client will use
    /// that endpoint (useful for DynamoDB Local or LocalStack).
    pub async fn build_dynamodb_client(&self) -> DynamoDbSdkClient {
        let sdk_config = self.build_sdk_config().await;

        if let Some(endpoint_url) = self.endpoint_override() {
            tracing::info!(endpoint = %endpoint_url, "Using custom DynamoDB endpoint");

            let dynamodb_config = aws_sdk_dynamodb::config::Builder::from(&sdk_config)
                .endpoint_url(endpoint_url)
                .build();

            DynamoDbSdkClient::from_conf(dynamodb_config)
        } else {
            DynamoDbSdkClient::new(&sdk_config)
        }
    }
}

/// Create a DynamoDB client from settings (convenience function)
pub async fn create_dynamodb_client(settings: &Settings) -> DynamoDbSdkClient {
    AwsConfigBuilder::new(settings).build_dynamodb_client().await
}
