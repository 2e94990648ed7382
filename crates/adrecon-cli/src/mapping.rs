//! `mapping` and `abbreviation` command handlers.
//!
//! Manual edits to the two dimension tables, mainly for assigning the
//! `unassigned` placeholders the spend importer creates.

use adrecon_core::{AbbreviationRecord, AbbreviationType, MappingRecord, Platform};
use clap::Subcommand;

#[derive(Debug, Subcommand)]
pub(crate) enum MappingCommands {
    /// List account mappings
    List {
        /// Only show accounts still waiting for an agency
        #[arg(long)]
        unassigned: bool,
    },
    /// Create or update one mapping
    Set {
        /// tencent, douyin or xiaohongshu
        platform: Platform,
        /// The account (sub-account on douyin); omit for a direct-buy main account
        #[arg(long)]
        account: Option<String>,
        /// Douyin main account
        #[arg(long)]
        main_account: Option<String>,
        #[arg(long)]
        agency: String,
        #[arg(long, default_value = "")]
        business_model: String,
    },
}

#[derive(Debug, Subcommand)]
pub(crate) enum AbbreviationCommands {
    /// List agency and platform short codes
    List,
    /// Create or update one short code
    Set {
        abbreviation: String,
        full_name: String,
        /// agency or platform
        #[arg(long = "type", default_value = "agency", value_parser = parse_abbreviation_type)]
        mapping_type: AbbreviationType,
        /// Store the code as inactive
        #[arg(long)]
        inactive: bool,
    },
}

fn parse_abbreviation_type(raw: &str) -> Result<AbbreviationType, String> {
    AbbreviationType::from_label(raw)
        .ok_or_else(|| format!("unknown abbreviation type '{raw}' (expected agency or platform)"))
}

fn dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

/// # Errors
///
/// Returns an error if the mapping has neither account id or the database
/// call fails.
pub(crate) async fn run_mapping(
    pool: &sqlx::PgPool,
    command: MappingCommands,
) -> anyhow::Result<()> {
    match command {
        MappingCommands::List { unassigned } => {
            let rows = adrecon_db::list_mappings(pool, unassigned).await?;
            if rows.is_empty() {
                println!("no mappings found");
                return Ok(());
            }
            println!(
                "{:<7}{:<13}{:<22}{:<22}{:<24}MODEL",
                "ID", "PLATFORM", "ACCOUNT", "MAIN ACCOUNT", "AGENCY"
            );
            for row in &rows {
                println!(
                    "{:<7}{:<13}{:<22}{:<22}{:<24}{}",
                    row.id,
                    row.platform,
                    dash(row.account_id.as_deref()),
                    dash(row.main_account_id.as_deref()),
                    row.agency,
                    dash(Some(&row.business_model))
                );
            }
        }
        MappingCommands::Set {
            platform,
            account,
            main_account,
            agency,
            business_model,
        } => {
            let mapping = MappingRecord {
                platform,
                account_id: account,
                main_account_id: main_account,
                agency,
                business_model,
            };
            let id = adrecon_db::save_mapping(pool, &mapping).await?;
            tracing::info!(id, %platform, agency = %mapping.agency, "mapping saved");
            println!("saved mapping {id}");
        }
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the database call fails.
pub(crate) async fn run_abbreviation(
    pool: &sqlx::PgPool,
    command: AbbreviationCommands,
) -> anyhow::Result<()> {
    match command {
        AbbreviationCommands::List => {
            let rows = adrecon_db::list_abbreviations(pool).await?;
            if rows.is_empty() {
                println!("no abbreviations found");
                return Ok(());
            }
            println!("{:<7}{:<10}{:<12}{:<8}FULL NAME", "ID", "TYPE", "CODE", "ACTIVE");
            for row in &rows {
                println!(
                    "{:<7}{:<10}{:<12}{:<8}{}",
                    row.id,
                    row.mapping_type,
                    row.abbreviation,
                    if row.is_active { "yes" } else { "no" },
                    row.full_name
                );
            }
        }
        AbbreviationCommands::Set {
            abbreviation,
            full_name,
            mapping_type,
            inactive,
        } => {
            let record = AbbreviationRecord {
                abbreviation,
                full_name,
                mapping_type,
                is_active: !inactive,
            };
            let id = adrecon_db::save_abbreviation(pool, &record).await?;
            println!("saved abbreviation {id}");
        }
    }
    Ok(())
}
