/*
 * SPDX-FileCopyrightText: 2025 Wavelens UG <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use git_url_parse::GitUrl;

pub fn greater_than_zero<
    T: std::str::FromStr + std::cmp::PartialOrd + std::fmt::Display + Default,
>(
    s: &str,
) -> Result<T, String> {
    let num: T = s
        .parse()
        .map_err(|_| format!("`{}` is not a valid number", s))?;

    if num > T::default() {
        Ok(num)
    } else {
        Err(format!("`{}` is not larger than 0", s))
    }
}

pub fn hex_to_vec(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("invalid hex string".to_string());
    }

    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

pub fn vec_to_hex(v: &[u8]) -> String {
    v.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn check_index_name(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("Name cannot be empty".to_string());
    }

    if s != s.to_lowercase() {
        return Err("Name must be lowercase".to_string());
    }

    if s.contains(|c: char| !c.is_ascii_alphanumeric() && c != '-') {
        return Err("Name can only contain letters, numbers, and dashes".to_string());
    }

    if s.starts_with('-') || s.ends_with('-') {
        return Err("Name can only start and end with letters or numbers".to_string());
    }

    Ok(())
}

pub fn check_repository_url(url: &str) -> Result<(), String> {
    if url.contains("file://") || url.starts_with("file") {
        return Err("URLs pointing to local files are not allowed".to_string());
    }

    if !(url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("ssh://")
        || url.starts_with("git@"))
    {
        return Err("Repository URL must use the http, https, ssh or scp-like syntax".to_string());
    }

    GitUrl::parse(url).map_err(|e| format!("`{}` is not a valid git remote URL: {}", url, e))?;

    Ok(())
}
