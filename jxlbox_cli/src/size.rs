// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Size strings with SI and IEC suffixes, for `--decompress-max`.

/// Parse a size like `4096`, `100k`, `2M`, `1Gi` or `512KiB`. SI suffixes
/// multiply by powers of 1000, IEC suffixes (`Ki`, `Mi`, …) by powers of
/// 1024; a trailing `B` is allowed either way. `-1`, `none` and `unlimited`
/// mean "no limit" and parse to `None`.
pub fn parse_size(input: &str) -> Result<Option<u64>, String> {
    let text = input.trim();
    if text == "-1" || text.eq_ignore_ascii_case("none") || text.eq_ignore_ascii_case("unlimited")
    {
        return Ok(None);
    }
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if digits_end == 0 {
        return Err(format!("`{input}` is not a size"));
    }
    let value: u64 = text[..digits_end]
        .parse()
        .map_err(|_| format!("`{input}` is out of range"))?;

    let multiplier: u64 = match text[digits_end..].to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1000,
        "m" | "mb" => 1000_u64.pow(2),
        "g" | "gb" => 1000_u64.pow(3),
        "t" | "tb" => 1000_u64.pow(4),
        "ki" | "kib" => 1024,
        "mi" | "mib" => 1024_u64.pow(2),
        "gi" | "gib" => 1024_u64.pow(3),
        "ti" | "tib" => 1024_u64.pow(4),
        _ => return Err(format!("`{input}` has an unknown size suffix")),
    };

    value
        .checked_mul(multiplier)
        .map(Some)
        .ok_or_else(|| format!("`{input}` overflows"))
}
