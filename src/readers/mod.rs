pub mod fluxnet_reader;
pub mod site_locator;

pub use fluxnet_reader::FluxnetReader;
pub use site_locator::{FluxnetFileName, SiteFiles, SiteLocator};
