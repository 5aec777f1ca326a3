//! warden-check: evaluate one permission check from the command line
//!
//! ```text
//! warden-check --config rbac.toml --principal U1 --role editor \
//!     --resource-type Note --operation find
//! FILTER {"eq":{"field":"ownerId","value":"U1"}}
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use warden_authz::{
    Decision, MemoryStore, Principal, RbacConfig, RbacEngine, RequestContext,
    ResourceContext,
};

/// Warden permission check CLI
#[derive(Parser)]
#[command(name = "warden-check")]
#[command(about = "Evaluate a row-level RBAC permission check")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Principal id; omit for an anonymous check
    #[arg(short, long)]
    principal: Option<String>,

    /// Declared role of the principal (repeatable)
    #[arg(short, long = "role")]
    roles: Vec<String>,

    /// Principal attribute as key=value (repeatable)
    #[arg(short, long = "attribute")]
    attributes: Vec<String>,

    /// Resource type to check
    #[arg(short = 't', long)]
    resource_type: String,

    /// Operation verb
    #[arg(short, long, default_value = "find")]
    operation: String,

    /// Record id; with --records a filter is settled by probing
    #[arg(long)]
    record_id: Option<String>,

    /// JSON file of records keyed by collection, used for probes
    #[arg(long)]
    records: Option<PathBuf>,

    /// Print the decision as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List roles (including hidden ones) and exit
    #[arg(long)]
    list_roles: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RbacConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RbacConfig::default(),
    };

    let directive = if cli.verbose { "debug" } else { config.log_directive() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directive.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let store = MemoryStore::new();
    if let Some(path) = &cli.records {
        load_records(&store, path).await?;
    }

    let engine = RbacEngine::from_config(&config, Arc::new(store))
        .context("Failed to build authorization engine")?;

    if cli.list_roles {
        for (id, name) in engine.role_options(true) {
            println!("{}\t{}", id, name);
        }
        return Ok(());
    }

    let ctx = request_context(cli.principal.as_deref(), &cli.roles, &cli.attributes)?;

    let resource = match &cli.record_id {
        Some(id) => ResourceContext::instance(&cli.resource_type, id, &cli.operation),
        None => ResourceContext::new(&cli.resource_type, &cli.operation),
    };

    info!("Checking {}", resource);
    let mut decision = engine.can(&ctx, &resource)?;

    if decision.is_filter() && cli.record_id.is_some() && cli.records.is_some() {
        let granted = engine.can_access_record(&ctx, &resource).await?;
        debug!("Probe for {} returned {}", resource, granted);
        decision = if granted { Decision::Grant } else { Decision::Deny };
    }

    if cli.json {
        let roles: Vec<&String> = ctx.roles(engine.resolver()).iter().collect();
        let output = json!({
            "check": resource.to_string(),
            "roles": roles,
            "decision": decision,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", decision);
    }

    Ok(())
}

fn request_context(principal: Option<&str>, roles: &[String], attributes: &[String]) -> Result<RequestContext> {
    match principal {
        Some(id) => Ok(RequestContext::for_principal(build_principal(id, roles, attributes)?)),
        None => {
            if !roles.is_empty() {
                bail!("--role requires --principal");
            }
            if !attributes.is_empty() {
                bail!("--attribute requires --principal");
            }
            Ok(RequestContext::anonymous())
        }
    }
}

fn build_principal(id: &str, roles: &[String], attributes: &[String]) -> Result<Principal> {
    let mut principal = Principal::new(id);

    for attribute in attributes {
        let (key, value) = attribute
            .split_once('=')
            .with_context(|| format!("Attribute '{}' must be key=value", attribute))?;
        principal = principal.with_attribute(key, value);
    }

    if !roles.is_empty() {
        principal = principal.with_roles(roles.iter().cloned());
    }

    Ok(principal)
}

async fn load_records(store: &MemoryStore, path: &PathBuf) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records from {}", path.display()))?;
    let collections: Map<String, Value> = serde_json::from_str(&contents)
        .context("Records file must be a JSON object of collection -> [documents]")?;

    for (collection, documents) in collections {
        let Value::Array(documents) = documents else {
            bail!("Records for '{}' must be an array", collection);
        };
        for document in documents {
            store.insert(collection.clone(), document).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_flags_require_a_principal() {
        let roles = vec!["editor".to_string()];
        let attributes = vec!["teamId=T1".to_string()];

        assert!(request_context(None, &roles, &[]).is_err());
        let err = request_context(None, &[], &attributes).unwrap_err();
        assert!(err.to_string().contains("--attribute"));
        assert!(request_context(None, &[], &[]).unwrap().principal().is_none());
    }

    #[test]
    fn test_attributes_land_on_the_principal() {
        let ctx = request_context(Some("U1"), &[], &["teamId=T1".to_string()]).unwrap();
        let principal = ctx.principal().unwrap();
        assert_eq!(principal.attribute_string("teamId").as_deref(), Some("T1"));

        assert!(request_context(Some("U1"), &[], &["teamId".to_string()]).is_err());
    }
}
