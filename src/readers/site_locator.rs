use crate::error::{ProcessingError, Result};
use crate::utils::constants::{
    AUXILIARY_SUBSET, DEFAULT_DATASET, DEFAULT_RESOLUTIONS, DEFAULT_SUBSET, FLUXNET_FILE_PREFIX,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Parsed `FLX_<SITE>_<DATASET>_<SUBSET>_<RES>_<YYYY>-<YYYY>_<VER>.csv` name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FluxnetFileName {
    pub site_code: String,
    pub dataset: String,
    pub subset: String,
    pub resolution: String,
    pub first_year: i32,
    pub last_year: i32,
    pub version_tag: String,
}

impl FluxnetFileName {
    pub fn parse(file_name: &str) -> Result<Self> {
        let invalid = || {
            ProcessingError::InvalidFormat(format!(
                "Filename does not match FLUXNET pattern: {}",
                file_name
            ))
        };

        let stem = file_name
            .strip_suffix(".csv")
            .or_else(|| file_name.strip_suffix(".CSV"))
            .ok_or_else(invalid)?;
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() != 7 || parts[0] != FLUXNET_FILE_PREFIX {
            return Err(invalid());
        }

        let (first, last) = parts[5].split_once('-').ok_or_else(invalid)?;
        let first_year: i32 = first.parse().map_err(|_| invalid())?;
        let last_year: i32 = last.parse().map_err(|_| invalid())?;
        if last_year < first_year {
            return Err(invalid());
        }

        Ok(Self {
            site_code: parts[1].to_string(),
            dataset: parts[2].to_string(),
            subset: parts[3].to_string(),
            resolution: parts[4].to_string(),
            first_year,
            last_year,
            version_tag: parts[6].to_string(),
        })
    }

    pub fn period(&self) -> (i32, i32) {
        (self.first_year, self.last_year)
    }

    pub fn version(&self) -> VersionTag {
        VersionTag::parse(&self.version_tag)
    }
}

/// Release ordering of a `<major>-<minor>` version tag. Pre-release tags
/// such as `beta-3` sort below every numbered release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionTag {
    pub is_release: bool,
    pub major: u32,
    pub minor: u32,
}

impl VersionTag {
    pub fn parse(tag: &str) -> Self {
        let (head, tail) = tag.split_once('-').unwrap_or((tag, ""));
        let minor = tail.parse().unwrap_or(0);
        match head.parse() {
            Ok(major) => Self {
                is_release: true,
                major,
                minor,
            },
            Err(_) => Self {
                is_release: false,
                major: 0,
                minor,
            },
        }
    }
}

/// A located site: its flux tower file and, if found, the reanalysis file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteFiles {
    pub site_code: String,
    pub path: PathBuf,
    pub version_tag: String,
    pub period: (i32, i32),
    pub auxiliary: Option<PathBuf>,
    pub auxiliary_period: Option<(i32, i32)>,
}

/// Scans directories for FLUXNET archives of one dataset and subset.
/// Resolutions are accepted in preference order, half-hourly first.
#[derive(Debug, Clone)]
pub struct SiteLocator {
    dataset: String,
    subset: String,
    resolutions: Vec<String>,
}

impl SiteLocator {
    pub fn new() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            subset: DEFAULT_SUBSET.to_string(),
            resolutions: DEFAULT_RESOLUTIONS.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn with_dataset(mut self, dataset: &str) -> Self {
        self.dataset = dataset.to_string();
        self
    }

    pub fn with_subset(mut self, subset: &str) -> Self {
        self.subset = subset.to_string();
        self
    }

    /// Restrict to a single resolution code; `None` keeps the HH/HR default
    pub fn with_resolution(mut self, resolution: Option<&str>) -> Self {
        if let Some(resolution) = resolution {
            self.resolutions = vec![resolution.to_string()];
        }
        self
    }

    fn preference(&self, resolution: &str) -> Option<usize> {
        self.resolutions.iter().position(|r| r == resolution)
    }

    /// Locate sites in `input_dir`, ordered by site code. Reanalysis files
    /// are looked up in `aux_dir`, or in `input_dir` when none is given.
    pub fn locate(&self, input_dir: &Path, aux_dir: Option<&Path>) -> Result<Vec<SiteFiles>> {
        if !input_dir.is_dir() {
            return Err(ProcessingError::MissingData(format!(
                "Input directory not found: {}",
                input_dir.display()
            )));
        }

        let sites = self.select(self.scan(input_dir, &self.subset)?);
        let auxiliary = self.scan(aux_dir.unwrap_or(input_dir), AUXILIARY_SUBSET)?;

        Ok(sites
            .into_values()
            .map(|(name, path)| {
                let aux = self.auxiliary_for(&name, &auxiliary);
                SiteFiles {
                    site_code: name.site_code.clone(),
                    path,
                    version_tag: name.version_tag.clone(),
                    period: name.period(),
                    auxiliary: aux.map(|(_, p)| p.to_path_buf()),
                    auxiliary_period: aux.map(|(n, _)| n.period()),
                }
            })
            .collect())
    }

    /// One file per site: the most preferred resolution, then the latest
    /// release within it
    fn select(
        &self,
        found: Vec<(FluxnetFileName, PathBuf)>,
    ) -> BTreeMap<String, (FluxnetFileName, PathBuf)> {
        let mut sites: BTreeMap<String, (FluxnetFileName, PathBuf)> = BTreeMap::new();
        for (name, path) in found {
            if !sites.contains_key(&name.site_code) {
                sites.insert(name.site_code.clone(), (name, path));
                continue;
            }
            let (existing, existing_path) = &sites[&name.site_code];

            let rank = |n: &FluxnetFileName| {
                (
                    std::cmp::Reverse(self.preference(&n.resolution)),
                    n.version(),
                )
            };
            let replace = rank(&name) > rank(existing);
            let (kept, skipped) = if replace {
                (&path, existing_path)
            } else {
                (existing_path, &path)
            };

            if existing.resolution != name.resolution {
                warn!(
                    site = %name.site_code,
                    kept = %kept.display(),
                    skipped = %skipped.display(),
                    "site has files at several resolutions"
                );
            } else {
                warn!(site = %name.site_code, kept = %kept.display(), skipped = %skipped.display(), "duplicate site file");
            }

            if replace {
                sites.insert(name.site_code.clone(), (name, path));
            }
        }
        sites
    }

    /// The reanalysis file of a site, at the site's own resolution when
    /// available
    fn auxiliary_for<'a>(
        &self,
        site: &FluxnetFileName,
        auxiliary: &'a [(FluxnetFileName, PathBuf)],
    ) -> Option<(&'a FluxnetFileName, &'a Path)> {
        let best = auxiliary
            .iter()
            .filter(|(n, _)| n.site_code == site.site_code)
            .max_by_key(|(n, _)| {
                (
                    n.resolution == site.resolution,
                    std::cmp::Reverse(self.preference(&n.resolution)),
                    n.version(),
                )
            })?;

        if best.0.resolution != site.resolution {
            warn!(
                site = %site.site_code,
                site_resolution = %site.resolution,
                auxiliary_resolution = %best.0.resolution,
                "reanalysis file resolution differs from site file"
            );
        }
        Some((&best.0, best.1.as_path()))
    }

    fn scan(&self, dir: &Path, subset: &str) -> Result<Vec<(FluxnetFileName, PathBuf)>> {
        if !dir.is_dir() {
            return Err(ProcessingError::MissingData(format!(
                "Directory not found: {}",
                dir.display()
            )));
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            let Ok(name) = FluxnetFileName::parse(file_name) else {
                continue;
            };
            if name.dataset != self.dataset || name.subset != subset {
                continue;
            }
            if self.preference(&name.resolution).is_none() {
                debug!(file = %file_name, "skipping other resolution");
                continue;
            }
            found.push((name, path));
        }

        found.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(found)
    }
}

impl Default for SiteLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_parse_file_name() {
        let name = FluxnetFileName::parse("FLX_US-Ha1_FLUXNET2015_FULLSET_HH_1991-2012_1-3.csv")
            .unwrap();
        assert_eq!(name.site_code, "US-Ha1");
        assert_eq!(name.subset, "FULLSET");
        assert_eq!(name.resolution, "HH");
        assert_eq!(name.period(), (1991, 2012));
        assert_eq!(name.version_tag, "1-3");
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert!(FluxnetFileName::parse("README.txt").is_err());
        assert!(FluxnetFileName::parse("FLX_US-Ha1_FLUXNET2015_FULLSET_HH_2012-1991_1-3.csv").is_err());
        assert!(FluxnetFileName::parse("FLX_US-Ha1_FULLSET_HH_1991-2012_1-3.csv").is_err());
    }

    #[test]
    fn test_locate_pairs_auxiliary_files() {
        let dir = TempDir::new().unwrap();
        for name in [
            "FLX_US-Ha1_FLUXNET2015_FULLSET_HH_1991-2012_1-3.csv",
            "FLX_US-Ha1_FLUXNET2015_ERAI_HH_1989-2014_1-3.csv",
            "FLX_AU-Tum_FLUXNET2015_FULLSET_HR_2001-2014_2-3.csv",
            "FLX_AU-Tum_FLUXNET2015_FULLSET_DD_2001-2014_2-3.csv",
            "notes.txt",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let sites = SiteLocator::new().locate(dir.path(), None).unwrap();
        let codes: Vec<&str> = sites.iter().map(|s| s.site_code.as_str()).collect();
        assert_eq!(codes, vec!["AU-Tum", "US-Ha1"]);
        assert!(sites[0].auxiliary.is_none());
        assert_eq!(sites[1].auxiliary_period, Some((1989, 2014)));

        let half_hourly = SiteLocator::new()
            .with_resolution(Some("HH"))
            .locate(dir.path(), None)
            .unwrap();
        assert_eq!(half_hourly.len(), 1);
        assert_eq!(half_hourly[0].period, (1991, 2012));
    }

    #[test]
    fn test_locate_prefers_half_hourly() {
        let dir = TempDir::new().unwrap();
        for resolution in ["DD", "HH", "MM", "WW", "YY"] {
            let name = format!("FLX_US-Ha1_FLUXNET2015_FULLSET_{}_2005-2005_1-3.csv", resolution);
            File::create(dir.path().join(name)).unwrap();
        }
        for resolution in ["DD", "HH"] {
            let name = format!("FLX_US-Ha1_FLUXNET2015_ERAI_{}_1989-2014_1-3.csv", resolution);
            File::create(dir.path().join(name)).unwrap();
        }

        let sites = SiteLocator::new().locate(dir.path(), None).unwrap();
        assert_eq!(sites.len(), 1);
        assert!(sites[0].path.ends_with("FLX_US-Ha1_FLUXNET2015_FULLSET_HH_2005-2005_1-3.csv"));
        assert!(sites[0]
            .auxiliary
            .as_ref()
            .unwrap()
            .ends_with("FLX_US-Ha1_FLUXNET2015_ERAI_HH_1989-2014_1-3.csv"));
    }

    #[test]
    fn test_locate_hourly_when_no_half_hourly() {
        let dir = TempDir::new().unwrap();
        for name in [
            "FLX_AU-Tum_FLUXNET2015_FULLSET_DD_2001-2014_2-3.csv",
            "FLX_AU-Tum_FLUXNET2015_FULLSET_HR_2001-2014_2-3.csv",
            "FLX_AU-Tum_FLUXNET2015_FULLSET_MM_2001-2014_2-3.csv",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let sites = SiteLocator::new().locate(dir.path(), None).unwrap();
        assert_eq!(sites.len(), 1);
        assert!(sites[0].path.ends_with("FLX_AU-Tum_FLUXNET2015_FULLSET_HR_2001-2014_2-3.csv"));

        let daily = SiteLocator::new()
            .with_resolution(Some("DD"))
            .locate(dir.path(), None)
            .unwrap();
        assert!(daily[0].path.ends_with("FLX_AU-Tum_FLUXNET2015_FULLSET_DD_2001-2014_2-3.csv"));
    }

    #[test]
    fn test_version_tag_ordering() {
        assert!(VersionTag::parse("1-10") > VersionTag::parse("1-3"));
        assert!(VersionTag::parse("2-1") > VersionTag::parse("1-10"));
        assert!(VersionTag::parse("1-3") > VersionTag::parse("beta-3"));
    }

    #[test]
    fn test_locate_keeps_latest_release() {
        let dir = TempDir::new().unwrap();
        for version in ["beta-3", "1-3", "1-10"] {
            let name = format!("FLX_US-Ha1_FLUXNET2015_FULLSET_HH_2005-2005_{}.csv", version);
            File::create(dir.path().join(name)).unwrap();
        }

        let sites = SiteLocator::new().locate(dir.path(), None).unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].version_tag, "1-10");
    }

    #[test]
    fn test_locate_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(SiteLocator::new().locate(&missing, None).is_err());
    }
}
