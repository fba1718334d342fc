use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use phenotyper_lib::{
    ingest::{JsonLinesSource, ReferenceDates},
    init_tracing,
    phenotype::{run, DefaultPhenotypeEngine, Phenotype},
    sink::DelimitedSink,
};

#[derive(Parser)]
#[command(name = "phenotyper")]
#[command(about = "Classify patients into phenotype tiers from annotated clinical notes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every patient in a JSON-lines document stream
    Run {
        /// Built-in phenotype name or path to a definition file
        #[arg(long)]
        phenotype: String,
        /// Input documents, one JSON object per line ("-" for stdin)
        #[arg(long, default_value = "-")]
        input: String,
        /// Output records ("-" for stdout)
        #[arg(long, default_value = "-")]
        output: String,
        /// Tab-separated patient reference dates used as a cutoff
        #[arg(long)]
        reference_dates: Option<PathBuf>,
        /// Finalization worker threads
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Write the run summary as JSON to this path
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// List built-in phenotypes
    List,
    /// Validate a phenotype definition file
    Check {
        /// Definition file
        path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Commands::Run {
            phenotype,
            input,
            output,
            reference_dates,
            workers,
            summary,
        }) => {
            let phenotype = Arc::new(Phenotype::resolve(&phenotype)?);
            let mut engine = DefaultPhenotypeEngine::new(phenotype.clone()).with_workers(workers);
            if let Some(path) = reference_dates {
                let reference = ReferenceDates::load(&path, phenotype.cutoff().patient_id_width)?;
                engine = engine.with_reference_dates(reference);
            }

            let reader: Box<dyn BufRead> = if input == "-" {
                Box::new(BufReader::new(io::stdin()))
            } else {
                Box::new(BufReader::new(File::open(&input)?))
            };
            let writer: Box<dyn Write> = if output == "-" {
                Box::new(BufWriter::new(io::stdout()))
            } else {
                Box::new(BufWriter::new(File::create(&output)?))
            };

            let mut sink = DelimitedSink::new(writer);
            let result = run(engine, JsonLinesSource::new(reader), &mut sink)?;
            if let Some(path) = summary {
                std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
            }
        }
        Some(Commands::List) => {
            for name in Phenotype::builtin_names() {
                match Phenotype::builtin(name) {
                    Ok(phenotype) => {
                        let tiers: Vec<&str> =
                            phenotype.tiers().iter().map(|t| t.name.as_str()).collect();
                        println!("{}: {}", name, tiers.join(" > "));
                    }
                    Err(e) => eprintln!("Error loading {}: {}", name, e),
                }
            }
        }
        Some(Commands::Check { path }) => {
            let phenotype = Phenotype::load(&path)?;
            println!(
                "{}: {} criteria, {} tiers, {} rules",
                phenotype.name(),
                phenotype.criteria().len(),
                phenotype.tiers().len(),
                phenotype.rules().len()
            );
        }
        None => {
            println!("Use 'phenotyper --help' for commands");
        }
    }

    Ok(())
}
