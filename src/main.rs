//! dynamo-access
//!
//! Operator command line over the access layer: read, write and scan
//! DynamoDB tables with the same semantics request handlers get.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dynamo_access::{
    config::{Environment, Settings},
    db::{
        conversions::{item_from_json, item_from_str, item_to_json},
        BatchKeys, DynamoDbClient, Item, Key, ReturnPolicy, ScanOptions, UpdateRequest,
    },
    logging::init_tracing,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// DynamoDB access layer command line
#[derive(Parser, Debug)]
#[command(name = "dynamo-access")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// AWS region (overrides AWS_REGION env var)
    #[arg(long, global = true)]
    region: Option<String>,

    /// DynamoDB endpoint URL, e.g. for DynamoDB Local (overrides DYNAMODB_ENDPOINT_URL)
    #[arg(long, global = true)]
    endpoint_url: Option<String>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long, global = true)]
    env: Option<Environment>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch one item by key
    Get {
        #[arg(long)]
        table: String,
        /// Key as a JSON object, e.g. '{"id": "o1"}'
        #[arg(long)]
        key: String,
    },

    /// Create or replace an item (created_at is kept, updated_at refreshed)
    Put {
        #[arg(long)]
        table: String,
        /// Item as a JSON object
        #[arg(long)]
        item: String,
    },

    /// Apply an update expression to one item
    Update {
        #[arg(long)]
        table: String,
        #[arg(long)]
        key: String,
        /// Update expression, e.g. 'SET total = :total'
        #[arg(long)]
        expression: String,
        /// Expression values as a JSON object, e.g. '{":total": 30}'
        #[arg(long)]
        values: Option<String>,
        /// Expression attribute names as a JSON object, e.g. '{"#t": "total"}'
        #[arg(long)]
        names: Option<String>,
        #[arg(long, value_enum, default_value_t = ReturnPolicy::UpdatedNew)]
        return_policy: ReturnPolicy,
    },

    /// Delete one item by key
    Delete {
        #[arg(long)]
        table: String,
        #[arg(long)]
        key: String,
    },

    /// Scan a table page by page
    Scan {
        #[arg(long)]
        table: String,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        projection: Option<String>,
        /// Expression values for the filter as a JSON object
        #[arg(long)]
        values: Option<String>,
        /// Items evaluated per page
        #[arg(long)]
        limit: Option<i32>,
        #[arg(long)]
        consistent_read: bool,
        /// Print one array with every item instead of one line per page
        #[arg(long)]
        all: bool,
    },

    /// Fetch many keys across tables, retrying unprocessed keys
    BatchGet {
        /// Tables to keys as JSON, e.g. '{"orders": [{"id": "o1"}]}'
        #[arg(long)]
        request: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load()?;

    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(region) = args.region {
        settings.aws_region = region;
    }
    if let Some(endpoint_url) = args.endpoint_url {
        settings.dynamodb_endpoint_url = Some(endpoint_url);
    }
    if let Some(env) = args.env {
        settings.environment = env;
    }
    settings.validate()?;

    init_tracing(&settings.log_level)?;

    tracing::debug!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        region = %settings.aws_region,
        "Starting"
    );

    let client = DynamoDbClient::new(Arc::new(settings));

    match args.command {
        Command::Get { table, key } => {
            let key = item_from_str(&key).context("Invalid --key")?;
            let item = client.get(&table, &key).await?;
            print_json(&item_to_json(&item))?;
        }
        Command::Put { table, item } => {
            let item = item_from_str(&item).context("Invalid --item")?;
            client.put(&table, item).await?;
        }
        Command::Update {
            table,
            key,
            expression,
            values,
            names,
            return_policy,
        } => {
            let key = item_from_str(&key).context("Invalid --key")?;
            let mut request = UpdateRequest::new(expression).with_return_policy(return_policy);
            if let Some(values) = values {
                request = request.with_values(item_from_str(&values).context("Invalid --values")?);
            }
            if let Some(names) = names {
                let names: HashMap<String, String> =
                    serde_json::from_str(&names).context("Invalid --names")?;
                request.expression_attribute_names = names;
            }
            let attributes = client.update(&table, &key, request).await?;
            print_json(&item_to_json(&attributes))?;
        }
        Command::Delete { table, key } => {
            let key = item_from_str(&key).context("Invalid --key")?;
            client.delete(&table, &key).await?;
        }
        Command::Scan {
            table,
            filter,
            projection,
            values,
            limit,
            consistent_read,
            all,
        } => {
            let mut options = ScanOptions::new().with_consistent_read(consistent_read);
            options.filter_expression = filter;
            options.projection_expression = projection;
            options.limit = limit;
            if let Some(values) = values {
                options.expression_attribute_values =
                    item_from_str(&values).context("Invalid --values")?;
            }

            if all {
                let items = client.get_all(&table, options).await?;
                print_json(&items_to_json(&items))?;
            } else {
                let pages = client.scan(&table, options);
                futures::pin_mut!(pages);
                let mut page_number = 0u32;
                while let Some(page) = pages.next().await {
                    let items = page?;
                    page_number += 1;
                    println!("{}", json!({"page": page_number, "items": items_to_json(&items)}));
                }
            }
        }
        Command::BatchGet { request } => {
            let request = parse_batch_request(&request).context("Invalid --request")?;
            let output = client.batch_get(request).await?;

            let responses: serde_json::Map<String, Value> = output
                .responses
                .iter()
                .map(|(table, items)| (table.clone(), items_to_json(items)))
                .collect();
            let unprocessed: serde_json::Map<String, Value> = output
                .unprocessed_keys
                .iter()
                .map(|(table, keys)| (table.clone(), items_to_json(keys)))
                .collect();

            print_json(&json!({
                "responses": responses,
                "unprocessed_keys": unprocessed,
                "attempts": output.attempts,
            }))?;
        }
    }

    Ok(())
}

fn parse_batch_request(request: &str) -> Result<BatchKeys> {
    let tables: HashMap<String, Vec<Value>> = serde_json::from_str(request)?;
    tables
        .into_iter()
        .map(|(table, keys)| -> Result<(String, Vec<Key>)> {
            let keys = keys
                .into_iter()
                .map(item_from_json)
                .collect::<Result<Vec<_>, _>>()?;
            Ok((table, keys))
        })
        .collect()
}

fn items_to_json(items: &[Item]) -> Value {
    Value::Array(items.iter().map(item_to_json).collect())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
