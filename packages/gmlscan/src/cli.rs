//! Command-line interface for gmlscan.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_yaml_ng::{Mapping, Value};

use crate::config::{Backend, ReaderOptions};
use crate::error::Result;
use crate::reader::FeatureReader;
use crate::types::{Feature, FeatureClass, PropertyValue};

/// gmlscan - Inspect and read GML feature collections.
#[derive(Parser)]
#[command(name = "gmlscan")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Infer and print the feature classes of a document.
    Schema {
        /// GML document
        file: PathBuf,

        /// Write the schema next to the document (.gfs)
        #[arg(short, long)]
        save: bool,

        /// Compute class extents
        #[arg(short, long)]
        extents: bool,

        /// Event-source backend (pull or batch)
        #[arg(short, long)]
        backend: Option<String>,
    },

    /// Print features as YAML.
    Dump {
        /// GML document
        file: PathBuf,

        /// Only features of this class
        #[arg(short, long)]
        class: Option<String>,

        /// Stop after this many features
        #[arg(short, long)]
        limit: Option<usize>,

        /// Event-source backend (pull or batch)
        #[arg(short, long)]
        backend: Option<String>,

        /// Fail on schema, geometry and link problems
        #[arg(long)]
        strict: bool,
    },

    /// Inline xlink:href references into a resolved copy of the document.
    Resolve {
        /// GML document
        file: PathBuf,

        /// Element names whose references are kept (repeatable, ALL skips every element)
        #[arg(long)]
        skip: Vec<String>,

        /// Fail on the first dangling reference
        #[arg(long)]
        strict: bool,
    },
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Schema {
            file,
            save,
            extents,
            backend,
        } => schema_command(&file, save, extents, backend.as_deref()),
        Commands::Dump {
            file,
            class,
            limit,
            backend,
            strict,
        } => dump_command(&file, class.as_deref(), limit, backend.as_deref(), strict),
        Commands::Resolve { file, skip, strict } => resolve_command(&file, &skip, strict),
    }
}

/// Environment options with command-line overrides applied.
fn reader_options(backend: Option<&str>, strict: bool) -> Result<ReaderOptions> {
    let mut options = ReaderOptions::from_env()?;
    if let Some(backend) = backend {
        options.backend = backend.parse::<Backend>()?;
    }
    options.strict |= strict;
    Ok(options)
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn print_warnings(reader: &FeatureReader) {
    if reader.warnings().is_empty() {
        return;
    }
    eprintln!(
        "{} {}",
        style("Warnings:").yellow().bold(),
        reader.warnings().len()
    );
    for warning in reader.warnings() {
        eprintln!("  {warning}");
    }
}

/// Execute the schema command.
fn schema_command(file: &Path, save: bool, extents: bool, backend: Option<&str>) -> Result<()> {
    let options = reader_options(backend, false)?;
    println!(
        "{} {} ({} backend)",
        style("Scanning").bold(),
        style(file.display()).cyan(),
        options.backend.as_str()
    );

    let pb = spinner("Inferring feature classes...");
    let mut reader = FeatureReader::new(options);
    reader.set_source_file(file);
    if let Err(e) = reader.prescan_for_schema(extents) {
        pb.finish_and_clear();
        return Err(e);
    }
    pb.finish_and_clear();

    println!();
    for class in reader.classes().iter() {
        print_class(class, extents);
    }
    if let Some(extent) = reader.document_extent() {
        println!(
            "{} ({}, {}) - ({}, {})",
            style("Document extent:").bold(),
            extent.min_x,
            extent.min_y,
            extent.max_x,
            extent.max_y
        );
    }

    if save {
        reader.save_classes(None)?;
        let schema_path = crate::schema::schema_path_for(file);
        println!();
        println!(
            "{} {}",
            style("Saved to:").green().bold(),
            schema_path.display()
        );
    }
    print_warnings(&reader);
    Ok(())
}

fn print_class(class: &FeatureClass, extents: bool) {
    println!(
        "{} ({} features)",
        style(class.name()).green().bold(),
        class.feature_count().unwrap_or(0)
    );
    for property in class.properties() {
        let multi = if property.multi_valued { " [list]" } else { "" };
        println!(
            "  {} {}{}",
            property.name,
            style(property.property_type).dim(),
            multi
        );
    }
    for slot in class.geometry_slots() {
        let kind = class
            .geometry_kind()
            .map(|k| format!("{k:?}"))
            .unwrap_or_default();
        println!("  {} {}", slot, style(format!("geometry {kind}")).dim());
    }
    if let (true, Some(extent)) = (extents, class.extent()) {
        println!(
            "  extent ({}, {}) - ({}, {})",
            extent.min_x, extent.min_y, extent.max_x, extent.max_y
        );
    }
}

/// Feature representation for YAML output.
#[derive(Serialize)]
struct FeatureRecord {
    class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fid: Option<String>,
    properties: Mapping,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    geometries: Vec<GeometryRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<String>,
}

#[derive(Serialize)]
struct GeometryRecord {
    slot: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    srs_name: Option<String>,
    raw: String,
}

fn property_value(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Text(text) | PropertyValue::Embedded(text) => Value::String(text.clone()),
        PropertyValue::List(items) => Value::Sequence(items.iter().map(property_value).collect()),
        PropertyValue::Link(href) => {
            let mut map = Mapping::new();
            map.insert("href".into(), Value::String(href.clone()));
            Value::Mapping(map)
        }
        PropertyValue::Measure { value, uom } => {
            let mut map = Mapping::new();
            map.insert("value".into(), Value::String(value.clone()));
            map.insert("uom".into(), Value::String(uom.clone()));
            Value::Mapping(map)
        }
    }
}

impl From<&Feature> for FeatureRecord {
    fn from(feature: &Feature) -> Self {
        Self {
            class: feature.class_name().to_string(),
            fid: feature.fid().map(String::from),
            properties: feature
                .properties()
                .iter()
                .map(|(name, value)| (Value::String(name.clone()), property_value(value)))
                .collect(),
            geometries: feature
                .geometries()
                .iter()
                .map(|g| GeometryRecord {
                    slot: g.name.clone(),
                    kind: format!("{:?}", g.kind),
                    srs_name: g.srs_name.clone(),
                    raw: g.raw.clone(),
                })
                .collect(),
            issues: feature.issues().iter().map(ToString::to_string).collect(),
        }
    }
}

/// Execute the dump command.
fn dump_command(
    file: &Path,
    class: Option<&str>,
    limit: Option<usize>,
    backend: Option<&str>,
    strict: bool,
) -> Result<()> {
    let options = reader_options(backend, strict)?;
    let mut reader = FeatureReader::open(file, options)?;
    reader.set_filtered_class_name(class);

    let mut count = 0;
    while limit.is_none_or(|limit| count < limit) {
        let Some(feature) = reader.next_feature()? else {
            break;
        };
        let yaml = serde_yaml_ng::to_string(&FeatureRecord::from(&feature))?;
        println!("---");
        print!("{yaml}");
        count += 1;
    }

    tracing::info!(features = count, "dump complete");
    print_warnings(&reader);
    Ok(())
}

/// Execute the resolve command.
fn resolve_command(file: &Path, skip: &[String], strict: bool) -> Result<()> {
    let options = reader_options(None, strict)?;
    println!(
        "{} {}",
        style("Resolving links in").bold(),
        style(file.display()).cyan()
    );

    let pb = spinner("Resolving references...");
    let mut reader = FeatureReader::new(options);
    reader.set_source_file(file);
    let resolution = match reader.resolve_links(skip, strict) {
        Ok(resolution) => resolution,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e);
        }
    };
    pb.finish_and_clear();

    println!("  Resolved: {}", style(resolution.resolved).green());
    if !resolution.dangling.is_empty() {
        println!(
            "  Dangling: {}",
            style(resolution.dangling.len()).yellow().bold()
        );
        for reference in &resolution.dangling {
            println!("    <{}> {}", reference.element, reference.href);
        }
    }
    println!();
    let label = if resolution.is_temp {
        "Saved to (temporary):"
    } else {
        "Saved to:"
    };
    println!(
        "{} {}",
        style(label).green().bold(),
        resolution.output_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_schema() {
        let cli = Cli::try_parse_from(["gmlscan", "schema", "roads.gml", "--save", "-b", "batch"])
            .unwrap();
        match cli.command {
            Commands::Schema {
                file,
                save,
                extents,
                backend,
            } => {
                assert_eq!(file, PathBuf::from("roads.gml"));
                assert!(save);
                assert!(!extents);
                assert_eq!(backend.as_deref(), Some("batch"));
            }
            _ => panic!("Expected Schema command"),
        }
    }

    #[test]
    fn test_cli_parse_dump() {
        let cli = Cli::try_parse_from([
            "gmlscan", "dump", "roads.gml", "--class", "Road", "--limit", "5", "--strict",
        ])
        .unwrap();
        match cli.command {
            Commands::Dump {
                class,
                limit,
                strict,
                ..
            } => {
                assert_eq!(class.as_deref(), Some("Road"));
                assert_eq!(limit, Some(5));
                assert!(strict);
            }
            _ => panic!("Expected Dump command"),
        }
    }

    #[test]
    fn test_cli_parse_resolve_repeated_skip() {
        let cli = Cli::try_parse_from([
            "gmlscan", "resolve", "roads.gml", "--skip", "owner", "--skip", "river",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve { skip, strict, .. } => {
                assert_eq!(skip, vec!["owner".to_string(), "river".to_string()]);
                assert!(!strict);
            }
            _ => panic!("Expected Resolve command"),
        }
    }

    #[test]
    fn test_property_value_yaml() {
        let value = property_value(&PropertyValue::Measure {
            value: "12".to_string(),
            uom: "m".to_string(),
        });
        let yaml = serde_yaml_ng::to_string(&value).unwrap();
        assert_eq!(yaml, "value: '12'\nuom: m\n");
    }
}
