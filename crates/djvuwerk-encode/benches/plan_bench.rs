// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for stage planning and encoder settings generation
// over a full dictionary group.

use std::collections::{BTreeMap, BTreeSet};

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use djvuwerk_core::config::PublishConfig;
use djvuwerk_core::types::{
    DictionaryParams, ExportSuggestion, ExportSuggestions, FileStamp, PageId, now_millis,
};
use djvuwerk_document::{DictionaryRegistry, OutputLayout, PageParams, SourceImagesInfo};
use djvuwerk_encode::commands::text_encoder_settings;
use djvuwerk_encode::plan;

const GROUP_SIZE: u32 = 25;

struct Group {
    _dir: tempfile::TempDir,
    layout: OutputLayout,
    registry: DictionaryRegistry,
    members: BTreeMap<PageId, PageParams>,
}

/// A produced dictionary group of mixed text and picture pages, with every
/// artifact on disk.
fn produced_group() -> Group {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = OutputLayout::new(dir.path(), &PublishConfig::default());
    layout.ensure_dirs().expect("dirs");
    let mut registry = DictionaryRegistry::new(DictionaryParams::default());

    let mut suggestions = ExportSuggestions::new();
    let pages: Vec<PageId> = (1..=GROUP_SIZE)
        .map(|n| PageId::single(format!("scan_{n:04}.tif")))
        .collect();
    for (n, page) in pages.iter().enumerate() {
        suggestions.insert(
            page.clone(),
            ExportSuggestion {
                has_bw_layer: true,
                has_color_layer: n % 3 == 0,
                width: 2480,
                height: 3508,
                dpi: 600,
            },
        );
    }

    let mut members = BTreeMap::new();
    for page in &pages {
        let id = registry.assign_new_page(page, GROUP_SIZE as usize);
        for path in [
            layout.page_image(page),
            layout.jb2(page),
            layout.bg44(page),
            layout.page_djvu(page),
            layout.foreground_layer(page),
            layout.background_layer(page),
        ] {
            std::fs::write(path, b"artifact").expect("write artifact");
        }
        let mut params = PageParams {
            dictionary_id: Some(id.clone()),
            source_images: SourceImagesInfo::compute(page, &layout, &suggestions),
            djvu: FileStamp::stat(layout.page_djvu(page)),
            ..PageParams::default()
        };
        params.remember(id, now_millis(), DictionaryParams::default());
        members.insert(page.clone(), params);
    }

    Group {
        _dir: dir,
        layout,
        registry,
        members,
    }
}

fn bench_plan(c: &mut Criterion) {
    let group = produced_group();
    let nothing_forced = BTreeSet::new();

    c.bench_function("plan_cached_group", |b| {
        b.iter(|| plan(black_box(&group.members), &nothing_forced, true))
    });

    let mut edited = group.members.clone();
    if let Some(params) = edited.values_mut().next() {
        params.smooth = true;
    }
    c.bench_function("plan_group_with_text_edit", |b| {
        b.iter(|| plan(black_box(&edited), &nothing_forced, true))
    });
}

fn bench_settings(c: &mut Criterion) {
    let group = produced_group();
    let inputs: Vec<(PageId, PageParams)> = group
        .members
        .iter()
        .map(|(p, params)| (p.clone(), params.clone()))
        .collect();
    let id = inputs[0].1.dictionary_id.clone().expect("assigned");

    c.bench_function("text_encoder_settings", |b| {
        b.iter(|| text_encoder_settings(&group.registry, &group.layout, black_box(&id), &inputs))
    });
}

criterion_group!(benches, bench_plan, bench_settings);
criterion_main!(benches);
