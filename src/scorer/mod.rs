pub mod converter;

pub use converter::OpportunityConverter;
