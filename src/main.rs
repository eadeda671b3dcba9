// src/main.rs

use procpool::errors::ProcessError;
use procpool::{cli, logging};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("procpool error: {err:?}");
        std::process::exit(1);
    }

    match procpool::run(args).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("procpool error: {err}");
            if let ProcessError::ProcessFailed { output_tail, .. } = &err {
                for line in output_tail {
                    eprintln!("  {line}");
                }
            }
            // Timeouts exit 124 so operators can tell "hung" from
            // "refused"; process failures carry the child's own code.
            std::process::exit(err.exit_code().unwrap_or(1));
        }
    }
}
