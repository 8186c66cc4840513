use crate::error::{ConvoyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A resource vector: CPU in millicores, memory in bytes, plus arbitrary
/// named scalars (devices, extended resources).
///
/// All arithmetic is dimension-wise. A dimension missing on either side is
/// treated as zero, so `{cpu: 5} <= {cpu: 12, memory: 4Gi}` holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// CPU in millicores (1000 = 1 core)
    pub milli_cpu: i64,
    /// Memory in bytes
    pub memory: i64,
    /// Named scalar resources (e.g. devices), by resource name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, i64>,
}

impl Resource {
    /// The empty resource vector
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a resource with cpu and memory only
    pub fn new(milli_cpu: i64, memory: i64) -> Self {
        Self {
            milli_cpu,
            memory,
            scalars: BTreeMap::new(),
        }
    }

    /// Build a resource from a map of quantity strings, e.g.
    /// `{"cpu": "2", "memory": "4Gi", "nvidia.com/gpu": "1"}`.
    pub fn from_resource_list(list: &BTreeMap<String, String>) -> Result<Self> {
        let mut res = Self::empty();
        for (name, value) in list {
            match name.as_str() {
                "cpu" => res.milli_cpu = parse_cpu(value)?,
                "memory" => res.memory = parse_memory(value)?,
                _ => {
                    let v = value.parse::<i64>().map_err(|e| {
                        ConvoyError::invalid_quantity(value.clone(), e.to_string())
                    })?;
                    res.scalars.insert(name.clone(), v);
                }
            }
        }
        Ok(res)
    }

    /// Add `other` into self, dimension-wise. Returns self for chaining.
    pub fn add(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu += other.milli_cpu;
        self.memory += other.memory;
        for (name, value) in &other.scalars {
            *self.scalars.entry(name.clone()).or_insert(0) += value;
        }
        self
    }

    /// Subtract `other` from self, dimension-wise, clamping each dimension
    /// at zero. An underflow means the caller's accounting drifted; it is
    /// logged upstream as an internal inconsistency rather than panicking.
    pub fn sub(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu = (self.milli_cpu - other.milli_cpu).max(0);
        self.memory = (self.memory - other.memory).max(0);
        for (name, value) in &other.scalars {
            let entry = self.scalars.entry(name.clone()).or_insert(0);
            *entry = (*entry - value).max(0);
        }
        self
    }

    /// Scale every dimension by `factor`. Returns self for chaining.
    pub fn multi(&mut self, factor: f64) -> &mut Self {
        self.milli_cpu = (self.milli_cpu as f64 * factor) as i64;
        self.memory = (self.memory as f64 * factor) as i64;
        for value in self.scalars.values_mut() {
            *value = (*value as f64 * factor) as i64;
        }
        self
    }

    /// True when every dimension of self is <= the matching dimension of
    /// `other` (missing dimensions are zero on both sides).
    pub fn less_equal(&self, other: &Resource) -> bool {
        if self.milli_cpu > other.milli_cpu || self.memory > other.memory {
            return false;
        }
        for (name, value) in &self.scalars {
            if *value > other.scalars.get(name).copied().unwrap_or(0) {
                return false;
            }
        }
        true
    }

    /// True when at least one dimension of self is strictly less than the
    /// matching dimension of `other`.
    pub fn less_partly(&self, other: &Resource) -> bool {
        if self.milli_cpu < other.milli_cpu || self.memory < other.memory {
            return true;
        }
        for (name, value) in &other.scalars {
            if self.scalars.get(name).copied().unwrap_or(0) < *value {
                return true;
            }
        }
        false
    }

    /// True when every dimension is zero
    pub fn is_empty(&self) -> bool {
        self.milli_cpu == 0 && self.memory == 0 && self.scalars.values().all(|v| *v == 0)
    }

    /// Cap every dimension of self at the matching dimension of `other`
    pub fn min_with(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu = self.milli_cpu.min(other.milli_cpu);
        self.memory = self.memory.min(other.memory);
        for (name, value) in self.scalars.iter_mut() {
            *value = (*value).min(other.scalars.get(name).copied().unwrap_or(0));
        }
        self
    }

    /// The largest per-dimension fraction of self over `total`; dimensions
    /// absent from `total` are ignored. Used for dominant-share arithmetic.
    pub fn dominant_share(&self, total: &Resource) -> f64 {
        let mut share: f64 = 0.0;
        if total.milli_cpu > 0 {
            share = share.max(self.milli_cpu as f64 / total.milli_cpu as f64);
        }
        if total.memory > 0 {
            share = share.max(self.memory as f64 / total.memory as f64);
        }
        for (name, value) in &self.scalars {
            if let Some(t) = total.scalars.get(name) {
                if *t > 0 {
                    share = share.max(*value as f64 / *t as f64);
                }
            }
        }
        share
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu {}m, memory {}", self.milli_cpu, self.memory)?;
        for (name, value) in &self.scalars {
            write!(f, ", {} {}", name, value)?;
        }
        Ok(())
    }
}

/// Parse a CPU quantity string (e.g., "2", "1000m", "0.5") to millicores
pub fn parse_cpu(s: &str) -> Result<i64> {
    if let Some(m) = s.strip_suffix('m') {
        m.parse::<i64>()
            .map_err(|e| ConvoyError::invalid_quantity(s, format!("bad millicore value: {}", e)))
    } else if let Ok(cores) = s.parse::<f64>() {
        Ok((cores * 1000.0) as i64)
    } else {
        Err(ConvoyError::invalid_quantity(s, "unrecognized cpu format"))
    }
}

/// Parse a memory quantity string (e.g., "128Mi", "1G", "1024") to bytes.
/// Binary (Ki/Mi/Gi) and decimal (K/M/G) suffixes are both accepted.
pub fn parse_memory(s: &str) -> Result<i64> {
    let parse = |num: &str, unit: i64| -> Result<i64> {
        num.parse::<i64>()
            .map(|v| v * unit)
            .map_err(|e| ConvoyError::invalid_quantity(s, e.to_string()))
    };

    if let Some(num) = s.strip_suffix("Ki") {
        parse(num, 1 << 10)
    } else if let Some(num) = s.strip_suffix("Mi") {
        parse(num, 1 << 20)
    } else if let Some(num) = s.strip_suffix("Gi") {
        parse(num, 1 << 30)
    } else if let Some(num) = s.strip_suffix('K') {
        parse(num, 1_000)
    } else if let Some(num) = s.strip_suffix('M') {
        parse(num, 1_000_000)
    } else if let Some(num) = s.strip_suffix('G') {
        parse(num, 1_000_000_000)
    } else {
        s.parse::<i64>()
            .map_err(|e| ConvoyError::invalid_quantity(s, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(cpu: i64, mem: i64) -> Resource {
        Resource::new(cpu, mem)
    }

    #[test]
    fn test_parse_cpu() {
        assert_eq!(parse_cpu("1").unwrap(), 1000);
        assert_eq!(parse_cpu("0.5").unwrap(), 500);
        assert_eq!(parse_cpu("100m").unwrap(), 100);
        assert_eq!(parse_cpu("2").unwrap(), 2000);
        assert!(parse_cpu("two").is_err());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("1024").unwrap(), 1024);
        assert_eq!(parse_memory("1Ki").unwrap(), 1024);
        assert_eq!(parse_memory("128Mi").unwrap(), 128 * 1024 * 1024);
        assert_eq!(parse_memory("1Gi").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_memory("2M").unwrap(), 2_000_000);
    }

    #[test]
    fn test_add_sub_round_trip() {
        let x = res(1500, 2048);
        let y = res(500, 1024);

        let mut sum = x.clone();
        sum.add(&y);
        assert_eq!(sum, res(2000, 3072));

        sum.sub(&y);
        assert_eq!(sum, x);
    }

    #[test]
    fn test_sub_clamps_at_zero() {
        let mut a = res(100, 100);
        a.sub(&res(200, 50));
        assert_eq!(a, res(0, 50));
    }

    #[test]
    fn test_less_equal_missing_dimensions() {
        let mut gpu = Resource::new(0, 0);
        gpu.scalars.insert("nvidia.com/gpu".to_string(), 1);

        // A dimension missing on the right counts as zero there.
        assert!(!gpu.less_equal(&res(4000, 1 << 30)));
        // And a dimension missing on the left counts as zero here.
        assert!(res(0, 0).less_equal(&gpu));
    }

    #[test]
    fn test_less_partly() {
        assert!(res(1000, 4096).less_partly(&res(2000, 1024)));
        assert!(!res(2000, 4096).less_partly(&res(2000, 1024)));
        assert!(!res(0, 0).less_partly(&res(0, 0)));
    }

    #[test]
    fn test_multi() {
        let mut total = res(10_000, 1000);
        total.multi(1.2);
        assert_eq!(total.milli_cpu, 12_000);
        assert_eq!(total.memory, 1200);
    }

    #[test]
    fn test_is_empty() {
        assert!(Resource::empty().is_empty());
        assert!(!res(1, 0).is_empty());
    }

    #[test]
    fn test_dominant_share() {
        let total = res(10_000, 10_000);
        let used = res(2_500, 5_000);
        let share = used.dominant_share(&total);
        assert!((share - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_resource_list() {
        let mut list = BTreeMap::new();
        list.insert("cpu".to_string(), "2".to_string());
        list.insert("memory".to_string(), "1Gi".to_string());
        list.insert("nvidia.com/gpu".to_string(), "2".to_string());

        let r = Resource::from_resource_list(&list).unwrap();
        assert_eq!(r.milli_cpu, 2000);
        assert_eq!(r.memory, 1 << 30);
        assert_eq!(r.scalars.get("nvidia.com/gpu"), Some(&2));
    }
}
