use clap::Parser;

/// Reconciles precinct-level election results with district boundaries and
/// county-level vote totals.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON file describing the job: input files, district shapes, rules and outputs.
    /// The paths in the file are relative to its directory.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path or 'stdout') If specified, the reconciled table is written in CSV format to the given
    /// location. Setting this option overrides the output path of the configuration.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference CSV file with the expected output. If provided, erjtool checks that the
    /// reconciled table matches the reference and prints the differences otherwise.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
