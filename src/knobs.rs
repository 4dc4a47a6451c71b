//! The knob table: every tunable an [`crate::Endpoint`] is configured with.
//!
//! Knobs are non-negative integers with a long name (used nowhere in this
//! crate except diagnostics) and a short name (used on the wire in
//! `blobstore://` URL query strings, per the normative table below).

/// All endpoint tunables. Every field is a non-negative integer; `0` is not
/// a valid value when supplied through a URL (it is reserved as the
/// "unset" sentinel the defaults use for a few fields), but a `Knobs` value
/// constructed directly in Rust may freely use it to mean "unlimited" where
/// documented below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Knobs {
    pub connect_tries: i64,
    pub connect_timeout: i64,
    pub max_connection_life: i64,
    pub request_tries: i64,
    pub request_timeout: i64,
    pub requests_per_second: i64,
    pub concurrent_requests: i64,
    pub multipart_max_part_size: i64,
    pub multipart_min_part_size: i64,
    pub concurrent_uploads: i64,
    pub concurrent_reads_per_file: i64,
    pub concurrent_writes_per_file: i64,
    pub read_block_size: i64,
    pub read_ahead_blocks: i64,
    pub read_cache_blocks_per_file: i64,
    /// 0 means unlimited.
    pub max_send_bytes_per_second: i64,
    /// 0 means unlimited.
    pub max_recv_bytes_per_second: i64,
}

/// Declaration-order table of `(long_name, short_name)`, normative for URL
/// round-tripping.
pub const KNOB_NAMES: &[(&str, &str)] = &[
    ("connect_tries", "ct"),
    ("connect_timeout", "cto"),
    ("max_connection_life", "mcl"),
    ("request_tries", "rt"),
    ("request_timeout", "rto"),
    ("requests_per_second", "rps"),
    ("concurrent_requests", "cr"),
    ("multipart_max_part_size", "maxps"),
    ("multipart_min_part_size", "minps"),
    ("concurrent_uploads", "cu"),
    ("concurrent_reads_per_file", "crpf"),
    ("concurrent_writes_per_file", "cwpf"),
    ("read_block_size", "rbs"),
    ("read_ahead_blocks", "rab"),
    ("read_cache_blocks_per_file", "rcb"),
    ("max_send_bytes_per_second", "sbps"),
    ("max_recv_bytes_per_second", "rbps"),
];

impl Default for Knobs {
    /// Conventional defaults for a client of this shape; see DESIGN.md for
    /// the reasoning behind each value.
    fn default() -> Self {
        Self {
            connect_tries: 2,
            connect_timeout: 60,
            max_connection_life: 120,
            request_tries: 5,
            request_timeout: 120,
            requests_per_second: 200,
            concurrent_requests: 256,
            multipart_max_part_size: 100_000_000,
            multipart_min_part_size: 5_000_000,
            concurrent_uploads: 256,
            concurrent_reads_per_file: 20,
            concurrent_writes_per_file: 20,
            read_block_size: 1_000_000,
            read_ahead_blocks: 0,
            read_cache_blocks_per_file: 0,
            max_send_bytes_per_second: 0,
            max_recv_bytes_per_second: 0,
        }
    }
}

impl Knobs {
    /// Looks up a knob by its long name.
    pub fn get(&self, long_name: &str) -> Option<i64> {
        match long_name {
            "connect_tries" => Some(self.connect_tries),
            "connect_timeout" => Some(self.connect_timeout),
            "max_connection_life" => Some(self.max_connection_life),
            "request_tries" => Some(self.request_tries),
            "request_timeout" => Some(self.request_timeout),
            "requests_per_second" => Some(self.requests_per_second),
            "concurrent_requests" => Some(self.concurrent_requests),
            "multipart_max_part_size" => Some(self.multipart_max_part_size),
            "multipart_min_part_size" => Some(self.multipart_min_part_size),
            "concurrent_uploads" => Some(self.concurrent_uploads),
            "concurrent_reads_per_file" => Some(self.concurrent_reads_per_file),
            "concurrent_writes_per_file" => Some(self.concurrent_writes_per_file),
            "read_block_size" => Some(self.read_block_size),
            "read_ahead_blocks" => Some(self.read_ahead_blocks),
            "read_cache_blocks_per_file" => Some(self.read_cache_blocks_per_file),
            "max_send_bytes_per_second" => Some(self.max_send_bytes_per_second),
            "max_recv_bytes_per_second" => Some(self.max_recv_bytes_per_second),
            _ => None,
        }
    }

    /// Sets a knob by its long name. Returns `false` for an unknown name.
    pub fn set(&mut self, long_name: &str, value: i64) -> bool {
        match long_name {
            "connect_tries" => self.connect_tries = value,
            "connect_timeout" => self.connect_timeout = value,
            "max_connection_life" => self.max_connection_life = value,
            "request_tries" => self.request_tries = value,
            "request_timeout" => self.request_timeout = value,
            "requests_per_second" => self.requests_per_second = value,
            "concurrent_requests" => self.concurrent_requests = value,
            "multipart_max_part_size" => self.multipart_max_part_size = value,
            "multipart_min_part_size" => self.multipart_min_part_size = value,
            "concurrent_uploads" => self.concurrent_uploads = value,
            "concurrent_reads_per_file" => self.concurrent_reads_per_file = value,
            "concurrent_writes_per_file" => self.concurrent_writes_per_file = value,
            "read_block_size" => self.read_block_size = value,
            "read_ahead_blocks" => self.read_ahead_blocks = value,
            "read_cache_blocks_per_file" => self.read_cache_blocks_per_file = value,
            "max_send_bytes_per_second" => self.max_send_bytes_per_second = value,
            "max_recv_bytes_per_second" => self.max_recv_bytes_per_second = value,
            _ => return false,
        }
        true
    }

    /// Resolves a short name (as used in URL query strings) to its long name.
    pub fn long_name_for(short: &str) -> Option<&'static str> {
        KNOB_NAMES
            .iter()
            .find(|(_, s)| *s == short)
            .map(|(l, _)| *l)
    }

    /// Short name for a long name, used when re-emitting a URL.
    pub fn short_name_for(long: &str) -> Option<&'static str> {
        KNOB_NAMES
            .iter()
            .find(|(l, _)| *l == long)
            .map(|(_, s)| *s)
    }

    /// Non-default knobs in declaration order, as `(short_name, value)` —
    /// exactly what [`crate::url::resource_url`] emits.
    pub fn non_default_pairs(&self) -> Vec<(&'static str, i64)> {
        let default = Knobs::default();
        KNOB_NAMES
            .iter()
            .filter_map(|(long, short)| {
                let v = self.get(long).unwrap();
                let d = default.get(long).unwrap();
                (v != d).then_some((*short, v))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_and_long_name_tables_agree() {
        for (long, short) in KNOB_NAMES {
            assert_eq!(Knobs::long_name_for(short), Some(*long));
            assert_eq!(Knobs::short_name_for(long), Some(*short));
        }
    }

    #[test]
    fn get_set_round_trip_every_field() {
        let mut k = Knobs::default();
        for (long, _) in KNOB_NAMES {
            assert!(k.set(long, 42));
            assert_eq!(k.get(long), Some(42));
        }
    }

    #[test]
    fn non_default_pairs_empty_for_default() {
        assert!(Knobs::default().non_default_pairs().is_empty());
    }

    #[test]
    fn non_default_pairs_reports_only_changed() {
        let mut k = Knobs::default();
        k.concurrent_requests = 4;
        k.requests_per_second = 10;
        assert_eq!(
            k.non_default_pairs(),
            vec![("rps", 10), ("cr", 4)]
        );
    }
}
