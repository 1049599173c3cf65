pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tradein_core::domain::grade::Grade;

use crate::commands::estimate::EstimateArgs;
use crate::commands::import_prices::ImportArgs;

#[derive(Debug, Parser)]
#[command(
    name = "tradein",
    about = "Trade-in marketplace operator CLI",
    long_about = "Operate the trade-in store: migrations, config inspection, demo data, price list imports and bulk estimates.",
    after_help = "Examples:\n  tradein migrate\n  tradein import-prices --file phones.csv --id PL-2026-10 --category phones --activate\n  tradein estimate --file manifest.csv --category phones --business \"Acme\" --contact \"Jo\" --email jo@acme.test"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo catalog, price list and partners (idempotent)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution"
    )]
    Config,
    #[command(about = "Import a price list from CSV (make,model,storage,A..E)")]
    ImportPrices {
        #[arg(long, help = "CSV file with a header row")]
        file: PathBuf,
        #[arg(long, help = "Price list id; an existing list is replaced and snapshotted")]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: String,
        #[arg(long, help = "YYYY-MM-DD, defaults to today")]
        effective_date: Option<NaiveDate>,
        #[arg(long, help = "Defaults to pricing.currency")]
        currency: Option<String>,
        #[arg(long, help = "Make this the category's active list")]
        activate: bool,
    },
    #[command(about = "Match and price a CSV manifest as a new bulk quote")]
    Estimate {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "phones")]
        category: String,
        #[arg(long, default_value = "A", help = "Grade assumed for rows without one")]
        grade: Grade,
        #[arg(long)]
        business: String,
        #[arg(long)]
        contact: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        referral_code: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::ImportPrices { file, id, name, category, effective_date, currency, activate } => {
            commands::import_prices::run(ImportArgs {
                file,
                id,
                name,
                category,
                effective_date,
                currency,
                activate,
            })
        }
        Command::Estimate { file, category, grade, business, contact, email, referral_code } => {
            commands::estimate::run(EstimateArgs {
                file,
                category,
                grade,
                business,
                contact,
                email,
                referral_code,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};
    use tradein_core::domain::grade::Grade;

    #[test]
    fn estimate_grade_defaults_to_a_and_parses_labels() {
        let cli = Cli::parse_from([
            "tradein", "estimate", "--file", "m.csv", "--category", "phones", "--business", "Acme",
            "--contact", "Jo", "--email", "jo@acme.test",
        ]);
        assert!(matches!(cli.command, Command::Estimate { grade: Grade::A, .. }));

        let cli = Cli::try_parse_from([
            "tradein", "estimate", "--file", "m.csv", "--category", "phones", "--grade", "grade c",
            "--business", "Acme", "--contact", "Jo", "--email", "jo@acme.test",
        ])
        .expect("grade label");
        assert!(matches!(cli.command, Command::Estimate { grade: Grade::C, .. }));
    }

    #[test]
    fn import_requires_an_id() {
        let parsed = Cli::try_parse_from(["tradein", "import-prices", "--file", "p.csv", "--category", "phones"]);
        assert!(parsed.is_err());
    }
}
