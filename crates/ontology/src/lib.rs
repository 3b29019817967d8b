mod index;
mod resolver;

pub use index::{levenshtein, OntologyError, OntologyIndex, SearchHit};
pub use resolver::{OntologyResolver, OntologySource, DEFAULT_FUZZY_DISTANCE};
