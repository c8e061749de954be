#![no_main]

use fraiseql_connect::{ConnectionConfig, ConnectionOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(config) = ConnectionConfig::parse(raw) {
        assert!(config.port != 0);
        let _ = format!("{:?}", config);
        let _ = config.startup_params();
        let _ = config.socket_path();
    }

    let _ = ConnectionOptions::from(raw).redacted();
});
