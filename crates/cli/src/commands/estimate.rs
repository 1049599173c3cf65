use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use tradein_core::domain::bulk_quote::BusinessContact;
use tradein_core::domain::device::CategoryId;
use tradein_core::domain::grade::Grade;
use tradein_core::domain::principal::Principal;
use tradein_core::estimate::ManifestRow;
use tradein_db::services::EstimateSubmission;

use crate::commands::{finish, open_pool, prepare, services, CommandError, CommandResult};

#[derive(Debug, Clone)]
pub struct EstimateArgs {
    pub file: PathBuf,
    pub category: String,
    pub grade: Grade,
    pub business: String,
    pub contact: String,
    pub email: String,
    pub referral_code: Option<String>,
}

pub fn run(args: EstimateArgs) -> CommandResult {
    let (config, runtime) = match prepare("estimate") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };
    let rows = match File::open(&args.file)
        .with_context(|| format!("cannot open `{}`", args.file.display()))
        .and_then(read_manifest)
    {
        Ok(rows) => rows,
        Err(error) => return CommandResult::failure("estimate", "input", format!("{error:#}"), 2),
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let services = services(pool.clone(), &config)?;
        let submission = EstimateSubmission {
            contact: BusinessContact {
                business_name: args.business.clone(),
                contact_name: args.contact.clone(),
                email: args.email.clone(),
                phone: None,
            },
            category: CategoryId(args.category.clone()),
            assumed_grade: args.grade,
            rows,
            referral_code: args.referral_code.clone(),
        };
        let detail = services
            .estimates
            .submit(submission, &Principal::system(), "cli-estimate")
            .await
            .map_err(|error| ("estimate", error.to_string(), 6u8))?;
        pool.close().await;

        let totals = &detail.quote.totals;
        Ok::<String, CommandError>(format!(
            "bulk quote {}: {} devices on {} lines, {} matched, {} unmatched, indicative total {} {}",
            detail.quote.id,
            totals.total_devices,
            detail.lines.len(),
            totals.matched_count,
            totals.unmatched_count,
            totals.total_indicative,
            detail.quote.currency
        ))
    });

    finish("estimate", result)
}

/// Every CSV record becomes one manifest row; the estimate pipeline decides
/// which rows are headers or blank.
pub fn read_manifest(input: impl Read) -> anyhow::Result<Vec<ManifestRow>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_reader(input);
    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("manifest line {} is not valid CSV", index + 1))?;
        rows.push(ManifestRow::new(record.iter()));
    }
    Ok(rows)
}
