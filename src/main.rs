use nestpm::cli::NestpmCli;

fn main() {
    let cli = NestpmCli::parse();
    nestpm::cli::logging::init(cli.verbose, cli.log_json);
    if let Err(e) = cli.run() {
        eprintln!("nestpm error: {:#}", e);
        std::process::exit(1);
    }
}
