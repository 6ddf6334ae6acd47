//! Tarnhelm CLI - Censorship-Resistant Search and Fetch MCP Server
//!
//! Runs the MCP server, or performs one search, fetch or DoH lookup directly.

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::{Value, json};
use std::net::Ipv4Addr;
use std::time::Duration;
use tarnhelm::{
    SERVER_NAME, TarnhelmError, TarnhelmResult, VERSION,
    dns::{DEFAULT_DOH_ENDPOINT, DOH_TIMEOUT, DohResolver},
    server::{ServerConfig, TarnhelmHandler, TarnhelmServer, TransportType},
    tools::{
        fetch,
        search::{self, DDG_HTML_URL},
    },
    transport::TransportConfig,
    types::{FetchArgs, SafeSearchLevel, SearchArgs, SearchResult},
};
use tracing_subscriber::{EnvFilter, fmt};

/// Tarnhelm - Censorship-Resistant Web Search and Fetch MCP Server
#[derive(Parser, Debug)]
#[command(
    name = "tarnhelm",
    version = VERSION,
    about = "A censorship-resistant DuckDuckGo search and fetch MCP server",
    long_about = "Tarnhelm is a Model Context Protocol (MCP) server that searches DuckDuckGo and fetches web pages.\n\n\
                  DuckDuckGo hostnames are resolved over DNS-over-HTTPS so that DNS tampering\n\
                  does not prevent searching."
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable all logging output (useful for stdio transport)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "pretty")]
    format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// Pretty-printed JSON
    Json,
    /// Single-line JSON
    JsonCompact,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the MCP server
    Serve(ServeArgs),

    /// Search DuckDuckGo
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value = "10")]
        max_results: usize,

        /// Safe search level: strict, moderate or off
        #[arg(short, long, default_value = "moderate")]
        safe_search: String,
    },

    /// Fetch a web page and print its visible text
    Fetch {
        /// URL to fetch
        url: String,
    },

    /// Resolve a hostname over DNS-over-HTTPS
    Resolve {
        /// Hostname to resolve
        host: String,

        /// DNS-over-HTTPS JSON endpoint, addressed by IP
        #[arg(long, default_value = DEFAULT_DOH_ENDPOINT, env = "TARNHELM_DOH_ENDPOINT")]
        doh_endpoint: String,
    },

    /// Show server information
    Info,

    /// Check DoH and search connectivity
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
enum TransportOption {
    /// Standard input/output (for MCP clients)
    #[default]
    Stdio,
    /// Server-Sent Events over HTTP
    Sse,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Transport type to use
    #[arg(short, long, default_value = "stdio", env = "TARNHELM_TRANSPORT")]
    transport: TransportOption,

    /// Port for SSE transport
    #[arg(short, long, default_value = "3000", env = "TARNHELM_PORT")]
    port: u16,

    /// IPv4 address to bind for SSE transport
    #[arg(long, default_value = "127.0.0.1", env = "TARNHELM_HOST")]
    host: String,

    /// DNS-over-HTTPS JSON endpoint, addressed by IP
    #[arg(long, default_value = DEFAULT_DOH_ENDPOINT, env = "TARNHELM_DOH_ENDPOINT")]
    doh_endpoint: String,

    /// DuckDuckGo HTML search endpoint
    #[arg(long, default_value = DDG_HTML_URL, env = "TARNHELM_SEARCH_ENDPOINT")]
    search_endpoint: String,

    /// Time budget for one tool call, in seconds
    #[arg(long, default_value = "60", env = "TARNHELM_TOOL_TIMEOUT")]
    tool_timeout: u64,

    /// Maximum tool calls executing at once
    #[arg(long, default_value = "10", env = "TARNHELM_MAX_CONCURRENT_TOOLS")]
    max_concurrent_tools: usize,
}

impl ServeArgs {
    fn server_config(&self, verbose: bool) -> ServerConfig {
        ServerConfig {
            transport: TransportConfig {
                doh_endpoint: self.doh_endpoint.clone(),
                ..Default::default()
            },
            search_endpoint: self.search_endpoint.clone(),
            tool_timeout: Duration::from_secs(self.tool_timeout),
            max_concurrent_tools: self.max_concurrent_tools,
            verbose,
            ..Default::default()
        }
    }

    fn transport_type(&self) -> TarnhelmResult<TransportType> {
        Ok(match self.transport {
            TransportOption::Stdio => TransportType::Stdio,
            TransportOption::Sse => TransportType::Sse {
                port: self.port,
                host: parse_host(&self.host)?,
            },
        })
    }
}

fn parse_host(host: &str) -> TarnhelmResult<[u8; 4]> {
    host.parse::<Ipv4Addr>()
        .map(|ip| ip.octets())
        .map_err(|_| TarnhelmError::InvalidArguments(format!("Invalid host format: {}", host)))
}

/// Set up logging with configurable output destination
///
/// # Arguments
/// * `verbose` - Enable debug-level logging
/// * `use_stderr` - Write logs to stderr instead of stdout (required for stdio transport)
/// * `quiet` - Disable all logging output
/// * `json` - Emit one JSON object per log event
fn setup_logging(verbose: bool, use_stderr: bool, quiet: bool, json: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("TARNHELM_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    // Stdout carries the JSON-RPC stream under stdio
    match (use_stderr, json) {
        (true, true) => subscriber.json().with_writer(std::io::stderr).init(),
        (true, false) => subscriber.with_writer(std::io::stderr).init(),
        (false, true) => subscriber.json().init(),
        (false, false) => subscriber.init(),
    }
}

/// Outcome of one `check` step
#[derive(Debug, Clone, Copy)]
enum Status {
    Ok,
    Warn,
    Fail,
}

/// Console output for the one-shot commands
struct Output {
    format: OutputFormat,
    plain: bool,
}

impl Output {
    fn is_json(&self) -> bool {
        self.format != OutputFormat::Pretty
    }

    fn json(&self, value: &Value) -> TarnhelmResult<()> {
        let text = match self.format {
            OutputFormat::JsonCompact => serde_json::to_string(value)?,
            _ => serde_json::to_string_pretty(value)?,
        };
        println!("{}", text);
        Ok(())
    }

    fn heading(&self, title: &str) {
        if self.plain {
            println!("\n{}\n{}", title, "=".repeat(50));
        } else {
            println!("\n{}", title.yellow().bold());
            println!("{}", "─".repeat(40).bright_black());
        }
    }

    fn field(&self, label: &str, value: &str) {
        println!("  {} {}", format!("{}:", label).bright_blue(), value);
    }

    fn status(&self, status: Status, message: &str) {
        let tag = match (status, self.plain) {
            (Status::Ok, true) => "[OK]".to_string(),
            (Status::Warn, true) => "[WARN]".to_string(),
            (Status::Fail, true) => "[FAIL]".to_string(),
            (Status::Ok, false) => "✓".green().bold().to_string(),
            (Status::Warn, false) => "⚠".yellow().to_string(),
            (Status::Fail, false) => "✗".red().bold().to_string(),
        };
        println!("  {} {}", tag, message);
    }

    fn error(&self, error: &TarnhelmError) {
        if self.plain {
            eprintln!("Error: {}", error);
        } else {
            eprintln!("{} Error: {}", "✗".red().bold(), error);
        }
    }

    fn banner(&self) {
        println!(
            r#"
╔═══════════════════════════════════════════════════════════════╗
║   {}                                        ║
║   Censorship-resistant DuckDuckGo search and fetch server     ║
╚═══════════════════════════════════════════════════════════════╝"#,
            format!("TARNHELM v{}", VERSION).bright_cyan().bold(),
        );
    }

    fn results(&self, query: &str, results: &[SearchResult]) {
        self.heading(&format!("Search Results for: {}", query.cyan()));
        println!("Found {} results\n", results.len().to_string().green());

        for result in results {
            println!(
                "{} {}",
                format!("{}.", result.position).bright_black(),
                result.title.white().bold()
            );
            println!("   {}", result.link.bright_blue().underline());
            if !result.snippet.is_empty() {
                println!("   {}", result.snippet);
            }
            println!();
        }
    }
}

async fn run_search(
    out: &Output,
    query: String,
    max_results: usize,
    safe_search: &str,
) -> TarnhelmResult<()> {
    let args = SearchArgs {
        max_results,
        safe_search: SafeSearchLevel::from(safe_search),
        ..SearchArgs::new(query)
    };

    let results = search::perform_search(&args).await?;

    if out.is_json() {
        out.json(&json!({ "query": args.query, "results": results }))
    } else if out.plain {
        println!("{}", search::format_results(&args.query, &results));
        Ok(())
    } else {
        out.results(&args.query, &results);
        Ok(())
    }
}

async fn run_fetch(out: &Output, url: String) -> TarnhelmResult<()> {
    let args = FetchArgs { url };
    let content = fetch::fetch_content(&args).await?;

    if out.is_json() {
        return out.json(&json!({ "url": args.url, "content": content }));
    }
    out.heading(&args.url);
    println!("{}", content);
    Ok(())
}

async fn run_resolve(out: &Output, host: String, doh_endpoint: String) -> TarnhelmResult<()> {
    let ip = DohResolver::new(doh_endpoint.clone(), DOH_TIMEOUT)?
        .resolve(&host)
        .await?;

    if out.is_json() {
        return out.json(&json!({ "host": host, "ip": ip.to_string(), "endpoint": doh_endpoint }));
    }
    println!("{} -> {}", host.white().bold(), ip.to_string().green());
    Ok(())
}

fn run_info(out: &Output) -> TarnhelmResult<()> {
    let handler = TarnhelmHandler::new(ServerConfig::default())?;
    let tools = handler.list_tools();

    if out.is_json() {
        return out.json(&json!({
            "server": handler.server_info(),
            "dohEndpoint": DEFAULT_DOH_ENDPOINT,
            "tools": tools,
        }));
    }

    if !out.plain {
        out.banner();
    }
    out.heading("Tarnhelm Server Information");
    out.field("Name", SERVER_NAME);
    out.field("Version", VERSION);
    out.field("DoH endpoint", DEFAULT_DOH_ENDPOINT);

    out.heading("Available Tools");
    for tool in &tools {
        out.field(&tool.name.green().to_string(), tool.description.as_deref().unwrap_or(""));
    }

    out.heading("Supported Transports");
    out.field(&"stdio".cyan().to_string(), "Standard I/O for MCP clients");
    out.field(&"sse".cyan().to_string(), "Server-Sent Events over HTTP");
    Ok(())
}

/// Returns whether every check passed
async fn run_check(out: &Output) -> TarnhelmResult<bool> {
    out.heading("Connectivity Check");
    let mut all_ok = true;

    match DohResolver::new(DEFAULT_DOH_ENDPOINT, DOH_TIMEOUT)?
        .resolve("html.duckduckgo.com")
        .await
    {
        Ok(ip) => out.status(
            Status::Ok,
            &format!("DoH resolved html.duckduckgo.com to {}", ip),
        ),
        Err(e) => {
            out.status(Status::Fail, &format!("DoH lookup: {}", e));
            all_ok = false;
        },
    }

    let sample_args = SearchArgs {
        max_results: 1,
        ..SearchArgs::new("test")
    };
    match search::perform_search(&sample_args).await {
        Ok(results) if results.is_empty() => out.status(Status::Warn, "Search returned no results"),
        Ok(_) => out.status(Status::Ok, "Search connectivity verified"),
        Err(e) => {
            out.status(Status::Fail, &format!("Search: {}", e));
            all_ok = false;
        },
    }

    println!();
    if all_ok {
        out.status(Status::Ok, "All checks passed");
    } else {
        out.status(Status::Fail, "Some checks failed");
    }
    Ok(all_ok)
}

/// Run one command. `Ok(false)` means it finished but should exit non-zero.
async fn run(cli: Cli, out: &Output) -> TarnhelmResult<bool> {
    match cli.command {
        Commands::Serve(args) => {
            let transport = args.transport_type()?;
            let stdio = transport == TransportType::Stdio;
            setup_logging(cli.verbose, stdio, cli.quiet, out.is_json());

            if !stdio && cli.verbose && !cli.quiet && !out.is_json() {
                out.banner();
            }

            TarnhelmServer::new(args.server_config(cli.verbose))?
                .run(transport)
                .await?;
        },
        Commands::Search {
            query,
            max_results,
            safe_search,
        } => run_search(out, query, max_results, &safe_search).await?,
        Commands::Fetch { url } => run_fetch(out, url).await?,
        Commands::Resolve { host, doh_endpoint } => run_resolve(out, host, doh_endpoint).await?,
        Commands::Info => run_info(out)?,
        Commands::Check => return run_check(out).await,
    }
    Ok(true)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    let out = Output {
        format: cli.format,
        plain: cli.no_color,
    };

    match run(cli, &out).await {
        Ok(true) => {},
        Ok(false) => std::process::exit(1),
        Err(e) => {
            out.error(&e);
            std::process::exit(1);
        },
    }
}
