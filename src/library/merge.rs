// Library record merge
//
// Precedence when an incoming record lands on an existing one:
// - id, createdAt: kept from the existing record (identity and history are stable)
// - name, path and derived paths, active, missing, projectRelative,
//   projectRelativePath: taken from the incoming record
// - assets, counts, warnings: replaced wholesale by the incoming record
// - resolvedPrefix, modelPath, projectId, lastValidation: incoming when set,
//   otherwise existing
// - updatedAt: the later of the two

use super::LibraryRecord;

pub fn merge_records(existing: &LibraryRecord, incoming: LibraryRecord) -> LibraryRecord {
    LibraryRecord {
        id: existing.id.clone(),
        created_at: existing.created_at,
        updated_at: existing.updated_at.max(incoming.updated_at),
        resolved_prefix: incoming.resolved_prefix.or_else(|| existing.resolved_prefix.clone()),
        model_path: incoming.model_path.or_else(|| existing.model_path.clone()),
        project_id: incoming.project_id.or_else(|| existing.project_id.clone()),
        last_validation: incoming.last_validation.or(existing.last_validation),
        name: incoming.name,
        path: incoming.path,
        symbol_path: incoming.symbol_path,
        base_path: incoming.base_path,
        active: incoming.active,
        missing: incoming.missing,
        assets: incoming.assets,
        counts: incoming.counts,
        warnings: incoming.warnings,
        project_relative: incoming.project_relative,
        project_relative_path: incoming.project_relative_path,
    }
}
