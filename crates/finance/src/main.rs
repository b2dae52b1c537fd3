use std::sync::Arc;

use color_eyre::eyre;
use finance::config::Config;
use quotes::{IexQuoteProvider, QuoteProvider};
use structopt::StructOpt;
use tracing::info;

// lib.rs에서 자동으로 dotenv가 로드됨

#[derive(Debug, StructOpt)]
#[structopt(name = "finance", about = "모의 주식 거래 서버")]
enum Command {
    /// API 서버 실행
    Serve {
        /// FINANCE_API_PORT 대신 사용할 포트
        #[structopt(long)]
        port: Option<u16>,
    },
    /// 시세 한 건 조회
    Quote {
        symbol: String,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // init error reporting
    color_eyre::install()?;

    let cmd = Command::from_args();

    // API_KEY가 없으면 여기서 종료
    let config = Config::from_env().map_err(|e| eyre::eyre!("설정 오류: {}", e))?;

    // init logging
    let _guards = finance::logger::init_tracing(&config.log_dir);

    let quotes: Arc<dyn QuoteProvider> = Arc::new(
        IexQuoteProvider::new(config.quote_base_url.clone(), config.api_key.clone())
            .map_err(|e| eyre::eyre!("시세 클라이언트 생성 실패: {}", e))?,
    );

    match cmd {
        Command::Serve { port } => run_server(config, quotes, port).await,
        Command::Quote { symbol } => run_quote(quotes, &symbol).await,
    }
}

async fn run_server(
    config: Config,
    quotes: Arc<dyn QuoteProvider>,
    port: Option<u16>,
) -> eyre::Result<()> {
    let store = finance::open_store(&config)
        .await
        .map_err(|e| eyre::eyre!("장부 저장소 초기화 실패: {}", e))?;

    let state = finance::build_state(&config, store, quotes);
    let port = port.unwrap_or(config.port);

    info!("API 서버를 포트 {}에서 시작합니다", port);
    finance::server::start_server(port, state).await
}

async fn run_quote(quotes: Arc<dyn QuoteProvider>, symbol: &str) -> eyre::Result<()> {
    let symbol = interface::normalize_symbol(symbol)
        .ok_or_else(|| eyre::eyre!("심볼을 입력하세요"))?;

    match quotes.lookup(&symbol).await? {
        Some(quote) => println!("{} ({}): {}", quote.name, quote.symbol, quote.price),
        None => println!("{}: 알 수 없는 심볼", symbol),
    }
    Ok(())
}
