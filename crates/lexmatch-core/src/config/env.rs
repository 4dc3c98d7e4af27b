#[must_use]
pub(super) fn read_non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub(super) fn read_env_usize(name: &str) -> Option<usize> {
    read_non_empty_env(name).and_then(|raw| raw.parse::<usize>().ok())
}

#[must_use]
pub(super) fn read_env_u32(name: &str) -> Option<u32> {
    read_non_empty_env(name).and_then(|raw| raw.parse::<u32>().ok())
}

#[must_use]
pub(super) fn read_env_u64(name: &str) -> Option<u64> {
    read_non_empty_env(name).and_then(|raw| raw.parse::<u64>().ok())
}

#[must_use]
pub(super) fn read_env_f64(name: &str) -> Option<f64> {
    read_non_empty_env(name).and_then(|raw| raw.parse::<f64>().ok())
}

#[must_use]
pub(super) fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        Some("1" | "true" | "yes" | "on") => Some(true),
        Some("0" | "false" | "no" | "off") => Some(false),
        _ => None,
    }
}

#[must_use]
pub(super) fn read_env_bool(name: &str) -> Option<bool> {
    parse_bool(read_non_empty_env(name).as_deref())
}

pub(super) fn override_with<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}
