#[cfg(feature = "cli")]
mod cli {
    use std::fs;
    use std::path::PathBuf;

    use clap::Parser;
    use log::{info, warn};
    use pairdist::{AlignmentFormat, DataType, Engine, PairdistError, Result};
    use serde::Serialize;

    #[derive(Parser, Debug)]
    #[command(author, version, about)]
    pub struct Args {
        /// Alignment file to process
        #[arg(value_name = "ALIGNMENT")]
        pub input: PathBuf,

        /// Alignment format: fasta (fas) or phylip (phy)
        #[arg(short, long, default_value = "fasta")]
        pub format: String,

        /// Data type: dna (nt) or protein (aa)
        #[arg(short, long, default_value = "dna")]
        pub datatype: String,

        /// Substitution model, e.g. JC69, HKY85, GTR, WAG01, LG08
        #[arg(short, long)]
        pub model: Option<String>,

        /// PHYLIP input is sequential rather than interleaved
        #[arg(long)]
        pub sequential: bool,

        /// Number of discrete gamma categories
        #[arg(long, default_value_t = 4)]
        pub ncat: usize,

        /// Gamma shape parameter
        #[arg(long, default_value_t = 1.0)]
        pub alpha: f64,

        /// Use closed-form Jukes-Cantor distances instead of ML
        #[arg(long)]
        pub fast: bool,

        /// Starting tree for likelihood optimisation (file or Newick string)
        #[arg(short, long)]
        pub tree: Option<String>,

        /// Optimise model parameters, branch lengths and topology
        #[arg(long)]
        pub optimise: bool,

        /// Keep model parameters fixed during the topology search
        #[arg(long)]
        pub fix_model: bool,

        /// Print a JSON report instead of tab-separated text
        #[arg(long)]
        pub json: bool,

        /// Write output to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        pub output: Option<PathBuf>,

        /// Increase log verbosity (-v info, -vv debug)
        #[arg(short, long, action = clap::ArgAction::Count)]
        pub verbose: u8,
    }

    #[derive(Serialize)]
    struct Report {
        names: Vec<String>,
        /// Distances on and above the diagonal, variances below.
        matrix: Vec<Vec<f64>>,
        model: Option<String>,
        alpha: f64,
        tree: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        log_likelihood: Option<f64>,
    }

    fn init_logging(verbose: u8) {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    }

    fn render_text(report: &Report) -> String {
        let mut out = String::new();
        out.push('\t');
        out.push_str(&report.names.join("\t"));
        out.push('\n');
        for (name, row) in report.names.iter().zip(&report.matrix) {
            out.push_str(name);
            for value in row {
                out.push_str(&format!("\t{:.6}", value));
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&report.tree);
        out.push('\n');
        if let Some(lnl) = report.log_likelihood {
            out.push_str(&format!("lnL\t{:.6}\n", lnl));
        }
        out
    }

    pub fn run() -> Result<()> {
        let args = Args::parse();
        init_logging(args.verbose);
        execute(args)
    }

    fn execute(args: Args) -> Result<()> {
        let format: AlignmentFormat = args.format.parse()?;
        let data_type = DataType::from_tag(&args.datatype)?;
        let interleaved = !args.sequential;

        let mut engine = match &args.model {
            Some(model) => {
                let (engine, failure) = Engine::from_file_with_model(
                    &args.input,
                    format,
                    data_type,
                    model,
                    interleaved,
                )?;
                if let Some(e) = failure {
                    if !args.fast || args.optimise {
                        return Err(e);
                    }
                    warn!("model {model}: {e}");
                }
                engine
            }
            None => Engine::from_file(&args.input, format, data_type, interleaved)?,
        };
        info!("{}", engine);
        engine.set_gamma(args.ncat, args.alpha)?;

        if args.fast || engine.model().is_none() {
            if !args.fast {
                warn!("no model given; using Jukes-Cantor distances");
            }
            engine.fast_compute_distances();
        } else {
            engine.compute_distances()?;
        }
        let matrix = engine.get_distance_variance_matrix()?;

        let mut tree = engine.get_nj_tree()?;
        let mut log_likelihood = None;
        if args.optimise {
            let start = args.tree.as_deref().unwrap_or(&tree).to_string();
            engine.initialise_likelihood(&start)?;
            engine.optimise_parameters(false)?;
            let lnl = engine.optimise_topology(args.fix_model)?;
            tree = engine.get_tree()?;
            log_likelihood = Some(lnl);
        } else if args.tree.is_some() {
            warn!("--tree is only used with --optimise");
        }

        let report = Report {
            names: engine.get_names(),
            matrix,
            model: engine.get_model().ok().map(str::to_string),
            alpha: engine.get_alpha(),
            tree,
            log_likelihood,
        };
        let rendered = if args.json {
            let mut text = serde_json::to_string_pretty(&report)
                .map_err(|e| PairdistError::Other(e.to_string()))?;
            text.push('\n');
            text
        } else {
            render_text(&report)
        };

        match args.output {
            Some(path) => fs::write(path, rendered)?,
            None => print!("{rendered}"),
        }
        Ok(())
    }

}

fn main() -> pairdist::Result<()> {
    #[cfg(feature = "cli")]
    {
        cli::run()
    }
    #[cfg(not(feature = "cli"))]
    {
        println!("CLI not enabled. Rebuild with --features cli");
        Ok(())
    }
}
