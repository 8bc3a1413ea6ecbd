//! Boundary cases around empty inputs, page clamping and TTLs.
