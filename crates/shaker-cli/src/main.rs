use clap::{value_parser, Arg, Command, ValueHint};
use rayon::ThreadPoolBuilder;
use shaker_cli::input::Input;
use shaker_cli::runner::Runner;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("SHAKER_LOG", "error,shaker=info"))
        .init();

    let matches = Command::new("shaker")
        .version(clap::crate_version!())
        .about("Target-decoy validation of peptide-spectrum matches, peptides and proteins")
        .arg(
            Arg::new("parameters")
                .short('p')
                .long("parameters")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("identifications")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the identification store (JSON file). Overrides the path \
                     listed in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where validation results will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("maps")
                .long("maps")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Reuse score distributions written by an earlier run (`maps.json`) \
                     instead of estimating them again",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("fdr")
                .long("fdr")
                .value_parser(value_parser!(f64))
                .help("FDR applied at every level unless set per level (default = 0.01)")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("probabilistic")
                .long("probabilistic")
                .action(clap::ArgAction::SetTrue)
                .help("Threshold on posterior error probabilities instead of scores"),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of worker threads (default = # of CPUs)")
                .value_hint(ValueHint::Other),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let threads = matches
        .get_one::<u16>("threads")
        .map(|&n| n as usize)
        .unwrap_or_else(num_cpus::get);
    ThreadPoolBuilder::new().num_threads(threads).build_global()?;

    let input = Input::from_arguments(matches)?;

    let runner = input.build().and_then(Runner::new)?;

    runner.run()
}
