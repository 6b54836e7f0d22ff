use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use trackstore_cli::{csv, load_config, sample, verify, VERSION};
use trackstore_repo::SampleSize;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("trackstore")
        .version(VERSION)
        .about("trackstore admin tool")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Store configuration JSON file"),
        )
        .subcommand(
            Command::new("sample")
                .about("Generate sample data and write it as a backup file")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("projects")
                        .long("projects")
                        .value_parser(value_parser!(usize))
                        .help("Number of projects to generate"),
                )
                .arg(
                    Arg::new("partners")
                        .long("partners")
                        .value_parser(value_parser!(usize))
                        .help("Number of SME partners to generate"),
                )
                .arg(
                    Arg::new("collaborators")
                        .long("collaborators")
                        .value_parser(value_parser!(usize))
                        .help("Number of collaborators to generate"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory for the backup file"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Restore a backup into a fresh store and print collection counts")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("csv")
                .about("Restore a backup and export projects and collaborators as CSV")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write to a file instead of stdout"),
                ),
        )
}

fn sample_size(args: &ArgMatches) -> SampleSize {
    let mut size = SampleSize::default();
    if let Some(projects) = args.get_one::<usize>("projects") {
        size.projects = *projects;
    }
    if let Some(partners) = args.get_one::<usize>("partners") {
        size.partners = *partners;
    }
    if let Some(collaborators) = args.get_one::<usize>("collaborators") {
        size.collaborators = *collaborators;
    }
    size
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    match matches.subcommand() {
        Some(("sample", args)) => {
            let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);
            let out = args
                .get_one::<PathBuf>("out")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("."));

            let path = sample(config, seed, sample_size(args), &out).await?;
            println!("{}", path.display());
        }
        Some(("verify", args)) => {
            let Some(file) = args.get_one::<PathBuf>("file") else {
                anyhow::bail!("missing backup file");
            };
            let report = verify(config, file).await?;

            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report.to_json())?);
            } else {
                print!("{}", report.to_text());
            }
        }
        Some(("csv", args)) => {
            let Some(file) = args.get_one::<PathBuf>("file") else {
                anyhow::bail!("missing backup file");
            };
            let out = args.get_one::<PathBuf>("out");
            let rendered = csv(config, file, out.map(PathBuf::as_path)).await?;

            if out.is_none() {
                print!("{rendered}");
            }
        }
        _ => {}
    }

    Ok(())
}
