// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Translation of firehose unit strings into backend units.

pub trait UnitParser: Send + Sync {
    /// Canonical unit for `raw`. Empty means dimensionless.
    fn parse(&self, raw: &str) -> String;
}

/// Maps the units emitted by platform components onto UCUM style units.
/// Anything unrecognised is wrapped in braces as an annotation, e.g.
/// `"req"` becomes `"{req}"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUnitParser;

impl UnitParser for DefaultUnitParser {
    fn parse(&self, raw: &str) -> String {
        let raw = raw.trim();
        let canonical = match raw.to_ascii_lowercase().as_str() {
            "" | "count" | "counter" => "",
            "ns" | "nanos" | "nanoseconds" => "ns",
            "us" | "micros" | "microseconds" => "us",
            "ms" | "millis" | "milliseconds" => "ms",
            "s" | "sec" | "seconds" => "s",
            "b" | "byte" | "bytes" => "By",
            "kb" | "kib" | "kilobytes" => "KiBy",
            "mb" | "mib" | "megabytes" => "MiBy",
            "gb" | "gib" | "gigabytes" => "GiBy",
            "percent" | "percentage" | "%" => "%",
            _ => return format!("{{{raw}}}"),
        };
        canonical.to_string()
    }
}
