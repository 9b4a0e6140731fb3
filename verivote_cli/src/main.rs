use clap::{App, Arg, SubCommand};

mod command_demo;
mod command_keygen;

fn main() {
    env_logger::init();

    let matches = App::new("VeriVote CLI")
        .version("0.1")
        .about("End-to-end verifiable voting protocol tools")
        .subcommand(SubCommand::with_name("keygen").about("Generate an ed25519 keypair"))
        .subcommand(
            SubCommand::with_name("demo")
                .about("Run a complete demo election and print its artifacts as JSON")
                .arg(
                    Arg::with_name("election-id")
                        .long("election-id")
                        .takes_value(true)
                        .help("Election id - can also be set with VERIVOTE_ELECTION_ID"),
                )
                .arg(
                    Arg::with_name("voters")
                        .long("voters")
                        .takes_value(true)
                        .help("Number of demo voters (default 3)"),
                ),
        )
        .get_matches();

    if matches.subcommand_matches("keygen").is_some() {
        command_keygen::command_keygen();
        return;
    }

    if let Some(matches) = matches.subcommand_matches("demo") {
        let env_var = std::env::var("VERIVOTE_ELECTION_ID");
        let election_id = match matches.value_of("election-id") {
            Some(id) => id.to_string(),
            None => env_var.unwrap_or_else(|_| "demo-election".to_string()),
        };

        let voters: usize = match matches.value_of("voters").unwrap_or("3").parse() {
            Ok(n) if n > 0 => n,
            _ => {
                eprintln!("verivote demo: --voters must be a positive number");
                std::process::exit(1);
            }
        };

        command_demo::command_demo(&election_id, voters);
    }
}
