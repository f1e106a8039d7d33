//! lossfit CLI

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lf_core::{Loss, ParamValues, Parameter};
use lf_inference::{MaximumLikelihoodEstimator, OptimizerConfig};
use lf_unbinned::document::{compile, read_document};
use lf_unbinned::{PdfRegistry, SimultaneousLoss};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lossfit")]
#[command(about = "lossfit - unbinned likelihood losses and fits")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the loss (and its gradient) at the initial parameter values
    Eval {
        /// Input loss document (YAML or JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Override a parameter value, `name=value`. Repeatable.
        #[arg(long = "set", value_parser = parse_assignment)]
        overrides: Vec<(String, f64)>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Perform MLE fit
    Fit {
        /// Input loss document (YAML or JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum optimizer iterations
        #[arg(long, default_value = "1000")]
        max_iter: u64,

        /// Gradient-norm convergence tolerance
        #[arg(long, default_value = "1e-6")]
        tol: f64,

        /// L-BFGS history size
        #[arg(long, default_value = "10")]
        lbfgs_m: usize,
    },

    /// Summarize the terms, parameters and constraints of a loss document
    Inspect {
        /// Input loss document (YAML or JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the JSON result.
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Eval { input, overrides, output } => {
            cmd_eval(&input, &overrides, output.as_ref())
        }
        Commands::Fit { input, output, max_iter, tol, lbfgs_m } => {
            let config = OptimizerConfig { max_iter, tol, m: lbfgs_m };
            cmd_fit(&input, output.as_ref(), config)
        }
        Commands::Inspect { input, output } => cmd_inspect(&input, output.as_ref()),
    }
}

fn load_loss(input: &PathBuf) -> Result<SimultaneousLoss> {
    let doc = read_document(input)?;
    let loss = compile(&doc, &PdfRegistry::with_builtins())
        .with_context(|| format!("failed to compile loss document {}", input.display()))?;
    tracing::info!(n_terms = loss.terms().len(), "loss compiled");
    Ok(loss)
}

fn parse_assignment(s: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) =
        s.split_once('=').ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty parameter name in '{s}'"));
    }
    let value: f64 =
        value.trim().parse().map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.to_string(), value))
}

/// Starting values with `overrides` applied; unknown names are an error.
fn apply_overrides(params: &[Parameter], overrides: &[(String, f64)]) -> Result<ParamValues> {
    let mut values = ParamValues::new();
    for (name, value) in overrides {
        let Some(p) = params.iter().find(|p| p.name() == name) else {
            bail!("unknown parameter '{name}'");
        };
        values.set(p, *value);
    }
    Ok(values)
}

fn cmd_eval(input: &PathBuf, overrides: &[(String, f64)], output: Option<&PathBuf>) -> Result<()> {
    let loss = load_loss(input)?;
    let params = loss.dependent_parameters()?.to_vec();
    let values = apply_overrides(&params, overrides)?;
    let (value, grad) = loss.value_and_grad(&values, &params)?;

    let output_json = serde_json::json!({
        "parameter_names": params.iter().map(Parameter::name).collect::<Vec<_>>(),
        "parameters": values.vector(&params),
        "nll": value,
        "gradient": grad,
    });
    write_json(output, output_json)
}

fn cmd_fit(input: &PathBuf, output: Option<&PathBuf>, config: OptimizerConfig) -> Result<()> {
    let loss = load_loss(input)?;

    let mle = MaximumLikelihoodEstimator::with_config(config);
    let result = mle.fit(&loss)?;
    tracing::info!(nll = result.nll, converged = result.converged, "fit complete");

    let output_json = serde_json::json!({
        "parameter_names": result.parameter_names,
        "bestfit": result.parameters,
        "uncertainties": result.uncertainties,
        "nll": result.nll,
        "twice_nll": 2.0 * result.nll,
        "converged": result.converged,
        "n_evaluations": result.n_evaluations,
        "message": result.message,
        "covariance": result.covariance,
        "optimizer": mle.config(),
    });
    write_json(output, output_json)
}

fn cmd_inspect(input: &PathBuf, output: Option<&PathBuf>) -> Result<()> {
    let loss = load_loss(input)?;

    let terms: Vec<serde_json::Value> = loss
        .terms()
        .iter()
        .map(|term| {
            let parts: Vec<serde_json::Value> = term
                .pdfs()
                .iter()
                .zip(term.data())
                .zip(term.fit_ranges())
                .map(|((pdf, data), range)| {
                    serde_json::json!({
                        "pdf": pdf.name(),
                        "type": pdf.type_tag(),
                        "observables": pdf.observables(),
                        "n_events": data.n_events(),
                        "sum_weights": data.sum_weights(),
                        "fit_range": range,
                    })
                })
                .collect();
            serde_json::json!({ "parts": parts, "n_constraints": term.constraints().len() })
        })
        .collect();

    let parameters = loss
        .dependent_parameters()?
        .iter()
        .map(parameter_summary)
        .collect::<Result<Vec<_>>>()?;

    let constraints: Vec<serde_json::Value> = loss
        .constraints()
        .iter()
        .map(|c| serde_json::json!({ "param": c.param().name(), "pdf": c.pdf().name() }))
        .collect();

    let output_json = serde_json::json!({
        "terms": terms,
        "parameters": parameters,
        "constraints": constraints,
    });
    write_json(output, output_json)
}

/// Parameter entry in document form; infinite bounds are written as `"inf"` / `"-inf"`.
fn parameter_summary(p: &Parameter) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(p.to_spec())?)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
