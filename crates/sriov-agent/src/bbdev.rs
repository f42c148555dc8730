//! `pf_bb_config` configuration files

use crds::{Acc100Config, QueueGroupConfig};
use std::fmt::Write;

/// Renders the ACC100 INI file consumed by `pf_bb_config ACC100 -c <file>`.
pub fn render_acc100(config: &Acc100Config) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[MODE]\npf_mode_en = {}\n", u8::from(config.pf_mode));
    let _ = writeln!(out, "[VFBUNDLES]\nnum_vf_bundles = {}\n", config.num_vf_bundles);
    let _ = writeln!(out, "[MAXQSIZE]\nmax_queue_size = {}\n", config.max_queue_size);
    for (section, group) in [
        ("QUL4G", &config.uplink_4g),
        ("QDL4G", &config.downlink_4g),
        ("QUL5G", &config.uplink_5g),
        ("QDL5G", &config.downlink_5g),
    ] {
        write_group(&mut out, section, group);
    }
    out
}

fn write_group(out: &mut String, section: &str, group: &QueueGroupConfig) {
    let _ = writeln!(
        out,
        "[{}]\nnum_qgroups = {}\nnum_aqs_per_groups = {}\naq_depth_log2 = {}\n",
        section, group.num_queue_groups, group.num_aqs_per_groups, group.aq_depth_log2
    );
}
