use super::settings::Settings;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.hostname, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert!(!settings.server.https);
    assert!(!settings.server.proxy_protocol);
    assert_eq!(settings.stream.keepalive_interval, 25);
    assert_eq!(settings.stream.retry_time, 10);
    assert_eq!(settings.stream.status_interval, 60);
    assert_eq!(settings.stream.shutdown_delay, 1000);
    assert_eq!(settings.api.url, "http://localhost:8000");
    assert_eq!(settings.api.version, 1);
    assert!(settings.api.request_headers.is_empty());
    assert_eq!(settings.ingest.topic, "streamcast");
    assert!(!settings.dev);
}
