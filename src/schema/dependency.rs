//! Foreign-key dependency ordering.

use crate::error::{DbError, DbResult};
use crate::models::EntitySchemaDescriptor;
use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Order entities so every entity comes after the entities it references.
///
/// Depth-first over foreign-key edges, starting from entities in the order
/// given. Self-references and fields marked `ignore_constraint` add no edge.
/// A cycle is a configuration error; a reference to an entity outside the
/// slice is an unknown reference.
pub fn dependency_order(
    entities: &[EntitySchemaDescriptor],
) -> DbResult<Vec<&EntitySchemaDescriptor>> {
    let by_name: HashMap<&str, &EntitySchemaDescriptor> =
        entities.iter().map(|e| (e.name.as_str(), e)).collect();
    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(entities.len());
    let mut ordered = Vec::with_capacity(entities.len());
    let mut path = Vec::new();

    for entity in entities {
        visit(entity, &by_name, &mut marks, &mut path, &mut ordered)?;
    }
    Ok(ordered)
}

fn visit<'a>(
    entity: &'a EntitySchemaDescriptor,
    by_name: &HashMap<&str, &'a EntitySchemaDescriptor>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    ordered: &mut Vec<&'a EntitySchemaDescriptor>,
) -> DbResult<()> {
    match marks.get(entity.name.as_str()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path
                .iter()
                .position(|name| *name == entity.name)
                .unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(&entity.name);
            return Err(DbError::invalid_input(format!(
                "Foreign key cycle between entities: {}",
                cycle.join(" -> ")
            )));
        }
        None => {}
    }

    marks.insert(&entity.name, Mark::Visiting);
    path.push(&entity.name);
    for field in &entity.fields {
        let Some(target) = &field.foreign_key else {
            continue;
        };
        if field.ignore_constraint || target.entity == entity.name {
            continue;
        }
        let referenced = by_name
            .get(target.entity.as_str())
            .copied()
            .ok_or_else(|| DbError::unknown_reference("entity", &target.entity))?;
        visit(referenced, by_name, marks, path, ordered)?;
    }
    path.pop();
    marks.insert(&entity.name, Mark::Done);
    ordered.push(entity);
    Ok(())
}
