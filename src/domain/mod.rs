// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types describing what a segmentation run IS:
// the mask legend that maps raw pixel values to classes, and
// the run-level choices (optimizer, export mode, backend) that
// are picked once at startup.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and small pure helpers
//
// Everything here is unit-testable without a device.

// Mapping from raw mask pixel values to class indices
pub mod legend;

// Run-level choices and the run identifier derived from them
pub mod run;
