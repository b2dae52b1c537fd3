use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "finance=debug,quotes=debug,tower_http=info,sea_orm=warn";

/// stdout + 일별 로그 파일 구독자 설치.
/// 반환된 guard가 살아 있는 동안만 파일 로그가 flush 된다.
pub fn init_tracing(log_dir: &Path) -> Vec<WorkerGuard> {
    let mut guards = Vec::new();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let file_appender = tracing_appender::rolling::daily(log_dir, "finance.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    guards.push(file_guard);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(stdout_writer))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    guards
}
