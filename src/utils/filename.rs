use crate::models::Category;
use crate::utils::constants::OUTPUT_EXTENSION;

/// Output file name of a record set: `<site>_<version>_<Met|Flux>.parquet`
pub fn output_file_name(site_code: &str, version_tag: &str, category: Category) -> String {
    format!(
        "{}_{}_{}.{}",
        site_code,
        version_tag,
        category.file_suffix(),
        OUTPUT_EXTENSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file_name() {
        assert_eq!(
            output_file_name("US-Ha1", "1-3", Category::Met),
            "US-Ha1_1-3_Met.parquet"
        );
        assert_eq!(
            output_file_name("AU-Tum", "beta-4", Category::Eval),
            "AU-Tum_beta-4_Flux.parquet"
        );
    }
}
