use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tradein_core::audit::AuditContext;
use tradein_core::domain::device::CategoryId;
use tradein_core::domain::grade::Grade;
use tradein_core::domain::price_list::PriceListId;
use tradein_db::services::{PriceListImport, PriceRow};

use crate::commands::{finish, open_pool, prepare, services, CommandError, CommandResult};

#[derive(Debug, Clone)]
pub struct ImportArgs {
    pub file: PathBuf,
    pub id: String,
    pub name: Option<String>,
    pub category: String,
    pub effective_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub activate: bool,
}

pub fn run(args: ImportArgs) -> CommandResult {
    let (config, runtime) = match prepare("import-prices") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };
    let rows = match File::open(&args.file)
        .with_context(|| format!("cannot open `{}`", args.file.display()))
        .and_then(parse_price_csv)
    {
        Ok(rows) => rows,
        Err(error) => {
            return CommandResult::failure("import-prices", "input", format!("{error:#}"), 2)
        }
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let services = services(pool.clone(), &config)?;
        let audit = AuditContext::system("cli-import-prices");
        let import = PriceListImport {
            id: PriceListId(args.id.clone()),
            name: args.name.clone().unwrap_or_else(|| args.id.clone()),
            category: CategoryId(args.category.clone()),
            effective_date: args.effective_date.unwrap_or_else(|| Utc::now().date_naive()),
            currency: args.currency.clone().unwrap_or_else(|| config.pricing.currency.clone()),
            rows,
        };
        let report = services
            .pricing
            .import(import, &audit)
            .await
            .map_err(|error| ("import", error.to_string(), 6u8))?;
        if args.activate {
            services
                .pricing
                .activate(&report.price_list_id, &audit)
                .await
                .map_err(|error| ("activate", error.to_string(), 6u8))?;
        }
        pool.close().await;
        Ok::<String, CommandError>(format!(
            "price list {} stored with {} entries ({} new devices){}",
            report.price_list_id,
            report.entries,
            report.devices_created.len(),
            if args.activate { ", now active" } else { "" }
        ))
    });

    finish("import-prices", result)
}

/// Reads `make,model,storage,A[,B,C,D,E]` rows. Blank grade cells are left
/// for derivation from grade A.
pub fn parse_price_csv(input: impl Read) -> anyhow::Result<Vec<PriceRow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).flexible(true).from_reader(input);
    let headers = reader.headers().context("price file has no header row")?.clone();
    let column = |name: &str| headers.iter().position(|header| header.eq_ignore_ascii_case(name));

    let (Some(make), Some(model)) = (column("make"), column("model")) else {
        bail!("price file needs `make` and `model` columns");
    };
    let storage = column("storage");
    let grades: Vec<(Grade, usize)> = Grade::ALL
        .into_iter()
        .filter_map(|grade| column(grade.as_str()).map(|index| (grade, index)))
        .collect();
    if !grades.iter().any(|(grade, _)| *grade == Grade::A) {
        bail!("price file needs a grade `A` column");
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let line = index + 2;
        let record = record.with_context(|| format!("line {line} is not valid CSV"))?;
        let field = |position: usize| record.get(position).unwrap_or_default();
        if record.iter().all(str::is_empty) {
            continue;
        }

        let mut prices = BTreeMap::new();
        for (grade, position) in &grades {
            let cell = field(*position).trim_start_matches('$');
            if cell.is_empty() {
                continue;
            }
            let price: Decimal = cell
                .parse()
                .with_context(|| format!("line {line}: grade {grade} price `{cell}` is not a number"))?;
            prices.insert(*grade, price);
        }
        rows.push(PriceRow {
            make: field(make).to_string(),
            model: field(model).to_string(),
            storage: storage.map(field).unwrap_or_default().to_string(),
            prices,
        });
    }
    Ok(rows)
}
