use clap::Parser;
use fetchkit::config::Command;
use fetchkit::utils::{logger, validation::Validate};
use fetchkit::{
    CliConfig, FetchError, FetchKitConfig, FetchOptions, FetchOutcome, FetchRequest, Fetcher,
    HttpMethod, ReqwestTransport, Scope,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    logger::init_cli_logger(config.logging.verbose, config.logging.json);
    tracing::debug!("CLI config: {:?}", config);

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let result = run(&config, cli.command).await;

    if let Err(e) = result {
        tracing::error!("❌ Request failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        let exit_code = if e.is_transient() { 2 } else { 1 };
        std::process::exit(exit_code);
    }

    Ok(())
}

async fn run(config: &FetchKitConfig, command: Command) -> Result<(), FetchError> {
    match command {
        Command::Get { url } => single(config, FetchRequest::get(config.resolve_url(&url)?)).await,
        Command::Send {
            url,
            method,
            data,
            idempotency_key,
        } => {
            let mut request = FetchRequest::new(method, config.resolve_url(&url)?);
            if let Some(data) = data {
                request = request.json(serde_json::from_str(&data)?);
            }
            if let Some(key) = idempotency_key {
                request = request.idempotency_key(key);
            }
            single(config, request).await
        }
        Command::Watch { url, param, .. } => watch(config, &config.resolve_url(&url)?, param).await,
    }
}

async fn single(config: &FetchKitConfig, request: FetchRequest) -> Result<(), FetchError> {
    let scope = Scope::new();
    let transport = ReqwestTransport::new(&config.client)?;
    let fetcher: Fetcher<serde_json::Value, _> =
        scope.fetcher(transport, FetchOptions::from_config(config));

    if request.method != HttpMethod::Get {
        tracing::info!("Sending {} {}", request.method, request.url);
    }

    if let FetchOutcome::Completed(body) = fetcher.execute(request).await? {
        println!("{}", serde_json::to_string_pretty(&body)?);
    }
    Ok(())
}

/// Debounces stdin lines into queries; each settled query supersedes the previous fetch.
async fn watch(config: &FetchKitConfig, url: &str, param: String) -> Result<(), FetchError> {
    let base = url::Url::parse(url).map_err(|e| FetchError::InvalidConfigValueError {
        field: "url".to_string(),
        value: url.to_string(),
        reason: e.to_string(),
    })?;

    let scope = Scope::new();
    let transport = ReqwestTransport::new(&config.client)?;
    let fetcher: Arc<Fetcher<serde_json::Value, _>> =
        Arc::new(scope.fetcher(transport, FetchOptions::from_config(config)));
    let debouncer = scope.debounced(String::new(), config.debounce_delay());
    let mut settled = debouncer.subscribe();

    tracing::info!(
        "Watching stdin, debounce {:?}, target {}",
        config.debounce_delay(),
        base
    );

    let worker = tokio::spawn(async move {
        let mut latest: Option<JoinHandle<()>> = None;
        while settled.changed().await.is_ok() {
            let query = settled.borrow_and_update().clone();
            if query.is_empty() {
                continue;
            }

            let mut target = base.clone();
            target.query_pairs_mut().append_pair(&param, &query);

            let fetcher = fetcher.clone();
            latest = Some(tokio::spawn(async move {
                match fetcher.execute(FetchRequest::get(target.as_str())).await {
                    Ok(FetchOutcome::Completed(body)) => println!("{} => {}", query, body),
                    Ok(FetchOutcome::Superseded) => tracing::debug!("'{}' superseded", query),
                    Err(e) => tracing::error!("'{}' failed: {}", query, e),
                }
            }));
        }
        if let Some(handle) = latest {
            if let Err(e) = handle.await {
                tracing::error!("fetch task failed: {}", e);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        debouncer.set(line.trim().to_string());
    }

    // Closing the input publishes the last pending query.
    drop(debouncer);
    if let Err(e) = worker.await {
        tracing::error!("watch worker failed: {}", e);
    }
    Ok(())
}
