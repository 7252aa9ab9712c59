// Highlight pipeline: sample -> classify -> intervals -> assemble

pub mod assembler;
pub mod backend;
pub mod classifier;
pub mod crop;
pub mod intervals;
pub mod orchestrator;
pub mod progress;
pub mod sampler;
pub mod types;
pub mod utilization;

#[cfg(test)]
pub mod testing;
