use clap::Parser;
use zls::config::Config;
use zls::lsp;

#[derive(Debug, Parser)]
#[command(name = "zls", version, about = "Language server for Zig")]
struct Cli {
    /// Lower the log threshold to debug messages
    #[arg(long, default_value_t = false)]
    debug_log: bool,
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load();
    if let Err(err) = lsp::serve_stdio(config, cli.debug_log) {
        eprintln!("zls failed: {err}");
        std::process::exit(1);
    }
}
