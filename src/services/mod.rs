pub mod identity;
pub mod knowledge;
pub mod persona;
pub mod scent;

pub use knowledge::KnowledgeGateway;
