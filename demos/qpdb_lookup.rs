use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

use getopts::Options;
use qpdb::{AddressMapping, ClientConfig, QueryPdb};
use tracing_subscriber::EnvFilter;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options] image.exe [symbol...]", program);
    print!("{}", opts.usage(&brief));
}

fn lookup(filename: &str, config: &ClientConfig, names: &BTreeSet<String>) -> qpdb::Result<()> {
    // no symbols requested: print the identifier even without a server
    if names.is_empty() {
        let data = std::fs::read(filename)?;
        let identifier = qpdb::extract_with(&data, config.address_mapping())?;
        println!("{}", identifier);
        return Ok(());
    }

    let qpdb = QueryPdb::with_config(filename, config);
    if let Some(identifier) = qpdb.identifier() {
        println!("{}", identifier);
    }

    let symbols = qpdb.get_symbols(names)?;
    println!("name\toffset");
    for (name, offset) in &symbols {
        println!("{}\t{:#x}", name, offset);
    }

    for name in names.iter().filter(|name| !symbols.contains_key(*name)) {
        eprintln!("{} could not be resolved", name);
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("s", "server", "symbol server URL", "URL");
    opts.optopt("t", "timeout", "request timeout in seconds", "SECS");
    opts.optflag("", "sections", "map addresses through the section table");
    opts.optflag("h", "help", "print this help menu");
    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, opts);
            std::process::exit(2);
        }
    };

    if matches.opt_present("h") || matches.free.is_empty() {
        print_usage(&program, opts);
        return;
    }

    let mut config = ClientConfig::new();
    if let Some(server) = matches.opt_str("s") {
        config = config.server(server);
    }
    if let Some(secs) = matches.opt_str("t") {
        match secs.parse::<u64>() {
            Ok(secs) => config = config.timeout(Duration::from_secs(secs)),
            Err(e) => {
                eprintln!("invalid timeout {:?}: {}", secs, e);
                std::process::exit(2);
            }
        }
    }
    if matches.opt_present("sections") {
        config = config.mapping(AddressMapping::Sections);
    }

    let filename = &matches.free[0];
    let names: BTreeSet<String> = matches.free[1..].iter().cloned().collect();

    match lookup(filename, &config, &names) {
        Ok(_) => (),
        Err(e) => {
            eprintln!("error looking up {}: {}", filename, e);
            std::process::exit(1);
        }
    }
}
