// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::RedlockSettings;
use crate::error::Result;
use comfy_table::{Cell, Table};

pub struct SettingsCommand<'a> {
    settings: &'a RedlockSettings,
}

impl<'a> SettingsCommand<'a> {
    pub fn new(settings: &'a RedlockSettings) -> Result<Self> {
        Ok(Self { settings })
    }

    pub fn execute(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self.settings)?);
            return Ok(());
        }

        let mut table = Table::new();
        table.load_preset(comfy_table::presets::UTF8_BORDERS_ONLY);
        table.set_header(vec![Cell::new("Setting"), Cell::new("Value")]);
        for (name, value) in rows(self.settings) {
            table.add_row(vec![Cell::new(name), Cell::new(value)]);
        }
        println!("{table}");
        Ok(())
    }
}

fn rows(settings: &RedlockSettings) -> Vec<(&'static str, String)> {
    let retry_count = if settings.retry_count == -1 {
        "unbounded".to_string()
    } else {
        settings.retry_count.to_string()
    };
    let node_timeout = match settings.node_timeout() {
        Some(timeout) => format!("{}ms", timeout.as_millis()),
        None => "disabled".to_string(),
    };

    vec![
        ("drift_factor", settings.drift_factor.to_string()),
        ("retry_count", retry_count),
        ("retry_delay_ms", settings.retry_delay_ms.to_string()),
        ("retry_jitter_ms", settings.retry_jitter_ms.to_string()),
        (
            "automatic_extension_threshold_ms",
            settings.automatic_extension_threshold_ms.to_string(),
        ),
        ("duration_ms", settings.duration_ms.to_string()),
        ("name", settings.name.clone()),
        ("dbname", settings.dbname.clone()),
        ("node_timeout", node_timeout),
        ("key_prefix", settings.resource_key("")),
    ]
}
