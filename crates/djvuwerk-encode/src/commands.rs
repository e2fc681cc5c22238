// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command lines and scripts for the DjVu encoder tools.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use djvuwerk_core::config::ToolPaths;
use djvuwerk_core::types::{DictionaryId, PageId};
use djvuwerk_document::{DictionaryRegistry, OutputLayout, PageParams};

use crate::runner::ToolInvocation;

/// Quote a string for a djvused script.
fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

// -- c44 ----------------------------------------------------------------------

/// Wavelet-encode the page's background (or whole image) into `<base>.bg44`.
pub fn c44(tools: &ToolPaths, layout: &OutputLayout, page: &PageId, params: &PageParams) -> ToolInvocation {
    let mut inv = ToolInvocation::new("c44", &tools.c44).args(["-iff", "-dpi"]).arg(params.dpi.to_string());
    if params.bsf > 1 {
        inv = inv
            .arg("-bsf")
            .arg(params.bsf.to_string())
            .arg("-bsm")
            .arg(params.scale_method.as_str());
    }
    inv.arg(params.source_images.raster_source())
        .arg(layout.bg44(page))
}

// -- minidjvu -----------------------------------------------------------------

/// Settings script for one text-encoder run over the members of `id`.
///
/// `members` must be in project order. Pages with a bitonal layer get an
/// input entry naming the image and the `.jb2` file to produce; blank pages
/// get a placeholder entry so the page still receives an (empty) mask.
pub fn text_encoder_settings(
    registry: &DictionaryRegistry,
    layout: &OutputLayout,
    id: &DictionaryId,
    members: &[(PageId, PageParams)],
) -> String {
    let mut lines = vec!["(input-files".to_owned()];
    let mut shared_files: Vec<PathBuf> = Vec::new();

    for (page, params) in members {
        let info = &params.source_images;
        let jb2 = layout.jb2(page);
        if info.suggestion.is_blank() {
            lines.push(format!("  (blank {}", jb2.display()));
            lines.push(format!(
                "    size     {},{}",
                info.suggestion.width, info.suggestion.height
            ));
            lines.push(format!("    dpi      {})", params.dpi));
            continue;
        }
        if !info.suggestion.has_bw_layer {
            continue;
        }
        let source = info.text_source();
        shared_files.push(source.to_path_buf());
        lines.push(format!("  (file {}", source.display()));
        lines.push(format!("    output   {}", jb2.display()));
        lines.push(format!("    dpi      {}", params.dpi));
        lines.push(format!("    clean    {}", flag(params.clean)));
        lines.push(format!("    erosion  {}", flag(params.erosion)));
        lines.push(format!("    smooth   {})", flag(params.smooth)));
    }
    lines.push(") #input-files".to_owned());
    lines.extend(registry.settings_block(id, &shared_files));

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

/// Run the shared-dictionary encoder with a settings file. `target` is
/// relative to the pages directory unless absolute.
pub fn minidjvu(tools: &ToolPaths, layout: &OutputLayout, settings: &Path, target: &Path) -> ToolInvocation {
    ToolInvocation::new("minidjvu", &tools.minidjvu)
        .args(["-u", "-r", "-j", "-S"])
        .arg(settings)
        .arg(layout.djvu_dir.join(target))
}

// -- djvumake -----------------------------------------------------------------

/// Assemble the page DjVu from its chunks. Runs inside the pages directory
/// so the dictionary is included by its bare file name.
pub fn djvumake(
    tools: &ToolPaths,
    registry: &DictionaryRegistry,
    layout: &OutputLayout,
    page: &PageId,
    params: &PageParams,
) -> ToolInvocation {
    let suggestion = &params.source_images.suggestion;
    let base = page.base_name();

    let mut inv = ToolInvocation::new("djvumake", &tools.djvumake)
        .current_dir(&layout.djvu_dir)
        .arg(layout.page_djvu(page))
        .arg(format!(
            "INFO={},{},{}",
            suggestion.width, suggestion.height, suggestion.dpi
        ));

    // INCL has to precede Sjbz.
    if let Some(id) = &params.dictionary_id {
        if !id.is_sentinel() && registry.dictionary(id).page_count() > 1 {
            inv = inv.arg(format!("INCL={id}.{}", registry.dictionary(id).params.extension));
        }
    }
    inv = inv.arg(format!("FGbz={}", params.fgbz_chunk()));
    if suggestion.has_bw_layer {
        inv = inv.arg(format!("Sjbz={base}.jb2"));
    }
    if suggestion.has_color_layer {
        inv = inv.arg(format!("BG44={base}.bg44"));
    }
    inv
}

// -- djvused ------------------------------------------------------------------

/// Title and rotation script for a single-page DjVu file. Rotation is
/// always written so a reset to 0 takes effect.
pub fn page_script(params: &PageParams) -> String {
    let mut script = String::new();
    if !params.title.is_empty() {
        script.push_str(&format!("select 1; set-page-title {}; ", quoted(&params.title)));
    }
    script.push_str(&format!("select 1; set-rotation \"{}\"; ", params.rotation));
    script
}

/// Script for the bundled document: titles and non-zero rotations by page
/// number (1-based, bundle order), then document metadata if a meta file is
/// given.
pub fn bundle_script(pages: &[PageParams], meta_file: Option<&Path>) -> String {
    let mut script = String::new();
    for (n, params) in pages.iter().enumerate() {
        let page_no = n + 1;
        if !params.title.is_empty() {
            script.push_str(&format!(
                "select {page_no}; set-page-title {}; ",
                quoted(&params.title)
            ));
        }
        if params.rotation != 0 {
            script.push_str(&format!(
                "select {page_no}; set-rotation \"{}\"; ",
                params.rotation
            ));
        }
    }
    if let Some(meta) = meta_file {
        script.push_str(&format!("select ; set-meta {}", quoted(&meta.to_string_lossy())));
    }
    script
}

/// Contents of a djvused metadata file.
pub fn metadata_file(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(key, value)| format!("{key}        {}\n", quoted(value)))
        .collect()
}

pub fn djvused(tools: &ToolPaths, file: &Path, script: &str) -> ToolInvocation {
    ToolInvocation::new("djvused", &tools.djvused)
        .arg(file)
        .arg("-e")
        .arg(script)
        .arg("-s")
}

// -- djvm ---------------------------------------------------------------------

/// Bundle page files, in order, into one document.
pub fn djvm(tools: &ToolPaths, bundle: &Path, pages: &[PathBuf]) -> ToolInvocation {
    ToolInvocation::new("djvm", &tools.djvm)
        .arg("-c")
        .arg(bundle)
        .args(pages.iter().map(|p| p.as_os_str().to_owned()))
}
