use crate::commands::{finish, open_pool, prepare, CommandError, CommandResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        pool.close().await;
        Ok::<String, CommandError>("applied pending migrations".to_string())
    });

    finish("migrate", result)
}
