use metrics::{counter, histogram};

pub fn record_git_request(service: &str) {
    counter!("gitbruv_git_requests_total", "service" => service.to_string()).increment(1);
}

/// `direction` is `sent` for fetches and `received` for pushes.
pub fn record_pack_objects(direction: &'static str, objects: usize) {
    counter!("gitbruv_pack_objects_total", "direction" => direction).increment(objects as u64);
}

pub fn record_bytes(direction: &'static str, bytes: usize) {
    counter!("gitbruv_bytes_total", "direction" => direction).increment(bytes as u64);
}

pub fn record_ref_update(ok: bool) {
    let result = if ok { "ok" } else { "rejected" };
    counter!("gitbruv_ref_updates_total", "result" => result).increment(1);
}

pub fn record_request_duration(route: &str, status: u16, duration_secs: f64) {
    histogram!(
        "gitbruv_http_request_duration_seconds",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .record(duration_secs);
}
