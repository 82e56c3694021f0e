use criterion::{Criterion, black_box, criterion_group, criterion_main};
use repro_explorer::refine::available_actions;
use repro_explorer::scene::hierarchy::{OVERLAY_PACKAGES, parse_hierarchy};
use repro_explorer::scene::{AppInfo, FingerprintMode, Scene, WidgetProps, WidgetTree, fingerprint};

/// A settings-like screen: a scrolling list of rows, each with a label and a switch
fn settings_tree(rows: usize) -> WidgetTree {
    let mut tree = WidgetTree::new();
    let list = tree.push(0, WidgetProps::new("androidx.recyclerview.widget.RecyclerView").package("com.example"));
    for i in 0..rows {
        let top = 80 * i as i32;
        let row = tree.push(
            list,
            WidgetProps::new("android.widget.LinearLayout")
                .package("com.example")
                .clickable(true)
                .bounds(0, top, 1080, top + 80),
        );
        tree.push(
            row,
            WidgetProps::new("android.widget.TextView")
                .package("com.example")
                .text(format!("Option {}", i))
                .bounds(20, top, 800, top + 80),
        );
        tree.push(
            row,
            WidgetProps::new("android.widget.Switch")
                .package("com.example")
                .resource_id("com.example:id/toggle")
                .checked(i % 2 == 0)
                .clickable(true)
                .bounds(900, top, 1060, top + 80),
        );
    }
    tree
}

fn dump_xml(rows: usize) -> String {
    let mut xml = String::from("<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation=\"0\">");
    xml.push_str("<node class=\"android.widget.FrameLayout\" package=\"com.example\" bounds=\"[0,0][1080,2400]\">");
    for i in 0..rows {
        let top = 80 * i;
        xml.push_str(&format!(
            "<node class=\"android.widget.Button\" package=\"com.example\" text=\"Row {i}\" clickable=\"true\" bounds=\"[0,{top}][1080,{bottom}]\" />",
            bottom = top + 80
        ));
    }
    xml.push_str("</node></hierarchy>");
    xml
}

fn benchmark_fingerprint(c: &mut Criterion) {
    let tree = settings_tree(100);

    c.bench_function("fingerprint_300_widgets", |b| {
        b.iter(|| fingerprint(black_box(&tree), FingerprintMode::Structural))
    });
}

fn benchmark_available_actions(c: &mut Criterion) {
    let scene = Scene::new(
        settings_tree(100),
        AppInfo::new("com.example", ".Settings"),
        FingerprintMode::Structural,
    );

    c.bench_function("available_actions_300_widgets", |b| {
        b.iter(|| available_actions(black_box(&scene)))
    });
}

fn benchmark_parse_hierarchy(c: &mut Criterion) {
    let xml = dump_xml(200);

    c.bench_function("parse_hierarchy_200_nodes", |b| {
        b.iter(|| {
            let tree = parse_hierarchy(black_box(&xml), OVERLAY_PACKAGES);
            assert!(tree.is_ok());
        })
    });
}

criterion_group!(benches, benchmark_fingerprint, benchmark_available_actions, benchmark_parse_hierarchy);
criterion_main!(benches);
