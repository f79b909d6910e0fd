use crate::cli::args::{CategoryArg, Cli, Commands, SelectionArgs};
use crate::error::Result;
use crate::models::Category;
use crate::processors::ParallelProcessor;
use crate::readers::{FluxnetReader, SiteFiles, SiteLocator};
use crate::registry::VariableRegistry;
use crate::utils::constants::{BATCH_SUMMARY_FILE, QC_SUFFIX};
use crate::utils::logging;
use crate::utils::progress::ProgressReporter;
use crate::writers::ParquetWriter;
use std::path::Path;
use tracing::{info, warn};

pub async fn run(cli: Cli) -> Result<()> {
    logging::init(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Convert {
            input_dir,
            output_dir,
            aux_dir,
            policy,
            selection,
            registry,
            compression,
            max_workers,
            site,
        } => {
            let policy = policy.resolve()?;
            if policy.gapfill_all_max.is_some() && policy.has_tier_limits() {
                warn!("gapfill_all_max is set, per-tier gap-fill limits are ignored");
            }
            let registry = load_registry(registry.as_deref())?;
            let writer = ParquetWriter::new().with_compression(&compression)?;

            let mut sites = locate(&selection, &input_dir, aux_dir.as_deref())?;
            if !site.is_empty() {
                sites.retain(|s| site.contains(&s.site_code));
            }

            println!("Converting FLUXNET sites...");
            println!("Input directory: {}", input_dir.display());
            println!("Output directory: {}", output_dir.display());
            println!("Sites: {}, Workers: {}", sites.len(), max_workers);

            if sites.is_empty() {
                println!("No matching site files found");
                return Ok(());
            }

            std::fs::create_dir_all(&output_dir)?;
            let processor =
                ParallelProcessor::new(max_workers).with_output(writer, output_dir.clone());

            let report = tokio::task::spawn_blocking(move || {
                let progress = ProgressReporter::new(sites.len() as u64, "Converting sites...", false);
                processor.process_sites(&sites, &registry, &policy, Some(&progress))
            })
            .await??;

            println!("\n{}", report.generate_summary());

            let summary_path = output_dir.join(BATCH_SUMMARY_FILE);
            report.write_json(&summary_path)?;
            info!(path = %summary_path.display(), "batch summary written");
            println!("Batch summary: {}", summary_path.display());
        }

        Commands::Inspect {
            input_dir,
            aux_dir,
            selection,
            registry,
        } => {
            let registry = load_registry(registry.as_deref())?;
            let sites = locate(&selection, &input_dir, aux_dir.as_deref())?;

            println!("Located {} site(s) in {}\n", sites.len(), input_dir.display());
            println!(
                "{:<10} {:<8} {:<11} {:<5} {:>7} {:>9} {:>8}  {}",
                "Site", "Version", "Period", "ERAI", "Mapped", "Essential", "Unmapped", "Missing essential"
            );

            let reader = FluxnetReader::new();
            for site in &sites {
                match inspect_site(&reader, &registry, site) {
                    Ok(line) => println!("{}", line),
                    Err(e) => println!("{:<10} unreadable: {}", site.site_code, e),
                }
            }
        }

        Commands::Registry { registry, category } => {
            let registry = load_registry(registry.as_deref())?;
            let shown = match category {
                Some(category) => {
                    let category = match category {
                        CategoryArg::Met => Category::Met,
                        CategoryArg::Eval => Category::Eval,
                    };
                    VariableRegistry::from_specs(
                        registry
                            .all_of_category(category)
                            .into_iter()
                            .cloned()
                            .collect(),
                    )?
                }
                None => registry,
            };

            println!("{}", shown.summary());
            println!("{} entries", shown.len());
        }
    }

    Ok(())
}

fn load_registry(path: Option<&Path>) -> Result<VariableRegistry> {
    match path {
        Some(path) => VariableRegistry::from_path(path),
        None => VariableRegistry::builtin(),
    }
}

fn locate(selection: &SelectionArgs, input_dir: &Path, aux_dir: Option<&Path>) -> Result<Vec<SiteFiles>> {
    SiteLocator::new()
        .with_dataset(&selection.dataset)
        .with_subset(&selection.subset)
        .with_resolution(selection.resolution.as_deref())
        .locate(input_dir, aux_dir)
}

/// One line of registry coverage for a located site
fn inspect_site(reader: &FluxnetReader, registry: &VariableRegistry, site: &SiteFiles) -> Result<String> {
    let header = reader.read_header(&site.path)?;

    let mapped: usize = header.iter().map(|h| registry.lookup(h).len()).sum();
    let unmapped = header
        .iter()
        .filter(|h| !h.starts_with("TIMESTAMP"))
        .filter(|h| {
            !registry.is_known_source(h)
                && !h
                    .strip_suffix(QC_SUFFIX)
                    .is_some_and(|base| registry.is_known_source(base))
        })
        .count();

    let reanalysis = match &site.auxiliary {
        Some(path) => {
            let aux_header = reader.read_header(path)?;
            let substitutes = registry.substitute_sources();
            let present = substitutes
                .iter()
                .filter(|s| aux_header.iter().any(|h| h == *s))
                .count();
            format!("{}/{}", present, substitutes.len())
        }
        None => "no".to_string(),
    };

    let essential = registry.essential_met();
    let missing: Vec<&str> = essential
        .iter()
        .filter(|spec| !header.contains(&spec.source_name))
        .map(|spec| spec.source_name.as_str())
        .collect();

    Ok(format!(
        "{:<10} {:<8} {:<11} {:<5} {:>7} {:>9} {:>8}  {}",
        site.site_code,
        site.version_tag,
        format!("{}-{}", site.period.0, site.period.1),
        reanalysis,
        mapped,
        format!("{}/{}", essential.len() - missing.len(), essential.len()),
        unmapped,
        missing.join(", ")
    ))
}
