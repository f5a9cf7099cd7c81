//! Generation of `.hive/instructions.md` (§4.5.1): a deterministic brief
//! describing the cell's identity, paths, running services, and the
//! Hive-provided tools, handed to the agent on every session ensure.

use std::fmt::Write as _;

use hive_store::{Cell, CellService};

const HIVE_TOOLS: &[&str] = &["hive_status", "hive_services", "hive_logs", "hive_restart_service"];

/// Render the instructions document. Deterministic given the same
/// `cell`/`services` inputs — callers may diff against the file on disk to
/// avoid an unnecessary rewrite, though this implementation always writes.
pub fn render(cell: &Cell, services: &[CellService]) -> String {
    let mut out = String::new();

    writeln!(out, "# Hive cell: {}", cell.name).unwrap();
    writeln!(out).unwrap();
    writeln!(out, "- Cell id: `{}`", cell.id).unwrap();
    writeln!(out, "- Workspace id: `{}`", cell.workspace_id).unwrap();
    writeln!(out, "- Template: `{}`", cell.template_id).unwrap();
    writeln!(out, "- Worktree: `{}`", cell.workspace_path.display()).unwrap();
    writeln!(out, "- Main repository: `{}`", cell.workspace_root_path.display()).unwrap();
    writeln!(out).unwrap();

    let base_url = std::env::var("HIVE_URL").unwrap_or_else(|_| "http://localhost".to_string());
    let base_url = base_url.trim_end_matches('/');

    writeln!(out, "## Services").unwrap();
    if services.is_empty() {
        writeln!(out, "(none declared by this template)").unwrap();
    } else {
        let mut sorted: Vec<&CellService> = services.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for service in sorted {
            let port_note = match service.port {
                Some(port) => format!("port {port}, {base_url}:{port}"),
                None => "no port bound".to_string(),
            };
            writeln!(out, "- `{}`: {} ({})", service.name, service.status, port_note).unwrap();
        }
    }
    writeln!(out).unwrap();

    writeln!(out, "## Environment").unwrap();
    writeln!(
        out,
        "Every service receives `HIVE_CELL_ID`, `HIVE_MAIN_REPO`, `HIVE_HOME`, and a \
         `<SERVICE_NAME>_PORT` variable for each sibling service with a bound port."
    )
    .unwrap();
    writeln!(out).unwrap();

    writeln!(out, "## Tools").unwrap();
    for tool in HIVE_TOOLS {
        writeln!(out, "- `{tool}`").unwrap();
    }

    out
}

/// Write the rendered document to `<workspace>/.hive/instructions.md`,
/// creating the `.hive` directory if needed.
pub fn write_to(workspace_root: &std::path::Path, cell: &Cell, services: &[CellService]) -> std::io::Result<()> {
    let paths = hive_paths::WorkspacePaths::for_workspace(workspace_root);
    std::fs::create_dir_all(paths.hive_dir())?;
    std::fs::write(paths.instructions_file(), render(cell, services))
}
