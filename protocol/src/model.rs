use serde::Deserialize;
use serde::Serialize;

/// Metadata about a model known to the local inference daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub digest: String,
    pub byte_size: u64,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization: Option<String>,
}

impl ModelDescriptor {
    /// `byteSize + max(0.2 * byteSize, 512 MiB)` times a configured safety
    /// factor. The safety factor is applied by the caller (the Inference
    /// Client owns the configured default); this computes the unscaled
    /// estimate.
    pub fn base_memory_estimate_bytes(&self) -> u64 {
        const MIN_OVERHEAD_BYTES: u64 = 512 * 1024 * 1024;
        let proportional_overhead = (self.byte_size as f64 * 0.2) as u64;
        let overhead = proportional_overhead.max(MIN_OVERHEAD_BYTES);
        self.byte_size + overhead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(byte_size: u64) -> ModelDescriptor {
        ModelDescriptor {
            name: "llama3.2:3b".to_string(),
            digest: "sha256:abc".to_string(),
            byte_size,
            family: None,
            parameter_size: None,
            quantization: None,
        }
    }

    #[test]
    fn small_models_use_the_minimum_overhead_floor() {
        let d = descriptor(1024 * 1024 * 1024); // 1 GiB
        // 20% of 1 GiB is well under the 512 MiB floor.
        assert_eq!(
            d.base_memory_estimate_bytes(),
            1024 * 1024 * 1024 + 512 * 1024 * 1024
        );
    }

    #[test]
    fn large_models_use_proportional_overhead() {
        let d = descriptor(10 * 1024 * 1024 * 1024); // 10 GiB
        let expected_overhead = (10.0 * 1024.0 * 1024.0 * 1024.0 * 0.2) as u64;
        assert_eq!(d.base_memory_estimate_bytes(), d.byte_size + expected_overhead);
    }
}
