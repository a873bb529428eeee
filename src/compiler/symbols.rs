//! Static-variable and procedure id assignment: stage variables/lists
//! get dense global ids first, then each sprite's own variables/lists
//! get a contiguous `[field_base_id, field_base_id + field_count)`
//! range directly following it. Both halves live in the same monotonic
//! id space — `Vm::resolve_static` (`host.rs`) is what tells a
//! sprite-owned id apart from a stage-global one at run time.

use hashbrown::HashMap;

use super::ast::Program;

pub struct SpriteSymbols {
    pub field_base_id: u32,
    pub field_count: usize,
    pub vars: HashMap<String, u32>,
}

pub struct SymbolTable {
    pub stage_vars: HashMap<String, u32>,
    pub sprites: HashMap<String, SpriteSymbols>,
    pub global_count: u32,
}

impl SymbolTable {
    /// Walks the program once, assigning ids in emit order: the stage's
    /// variables and lists first, then each sprite's in program order.
    /// Duplicate names within one sprite's variable panel can't occur —
    /// the project format the external parser consumes already forbids
    /// them — so this never fails.
    pub fn build(program: &Program) -> Self {
        let mut next_id = 0u32;
        let mut stage_vars = HashMap::new();
        for def in program.stage.variables.iter().chain(program.stage.lists.iter()) {
            stage_vars.insert(def.name.clone(), next_id);
            next_id += 1;
        }

        let mut sprites = HashMap::new();
        for sprite in program.sprites.iter() {
            let field_base_id = next_id;
            let mut vars = HashMap::new();
            for def in sprite.variables.iter().chain(sprite.lists.iter()) {
                vars.insert(def.name.clone(), next_id);
                next_id += 1;
            }
            let field_count = (next_id - field_base_id) as usize;
            sprites.insert(sprite.name.clone(), SpriteSymbols { field_base_id, field_count, vars });
        }

        SymbolTable { stage_vars, sprites, global_count: next_id }
    }

    /// Resolves a variable/list name as seen from a script running on
    /// `owner`: the sprite's own field first, then the stage globals.
    pub fn resolve(&self, owner: &str, name: &str) -> Option<u32> {
        if let Some(sym) = self.sprites.get(owner) {
            if let Some(&id) = sym.vars.get(name) {
                return Some(id);
            }
        }
        self.stage_vars.get(name).copied()
    }

    /// Resolves a variable/list owned by a specific named sprite
    /// (used for the handful of cross-sprite references the AST can
    /// express). The id still lives in the shared static space, but a
    /// script not running on `sprite` reading it through `getstatic`
    /// only ever observes the seed value copied into the globals table
    /// at load time, not a running clone's live field — the same
    /// limitation stage/global reads never hit, since those never
    /// redirect into a per-instance `fields` array to begin with.
    pub fn resolve_of(&self, sprite: &str, name: &str) -> Option<u32> {
        self.sprites.get(sprite).and_then(|sym| sym.vars.get(name).copied())
    }

    pub fn field_base(&self, sprite: &str) -> u32 {
        self.sprites.get(sprite).map(|s| s.field_base_id).unwrap_or(0)
    }

    pub fn field_count(&self, sprite: &str) -> usize {
        self.sprites.get(sprite).map(|s| s.field_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{SpriteDef, VarDef};

    fn sprite(name: &str, vars: &[&str]) -> SpriteDef {
        SpriteDef {
            name: name.to_string(),
            is_stage: false,
            variables: vars.iter().map(|v| VarDef { name: v.to_string() }).collect(),
            lists: Vec::new(),
            costumes: Vec::new(),
            sounds: Vec::new(),
            current_costume: 1,
            scripts: Vec::new(),
            procedures: Vec::new(),
        }
    }

    #[test]
    fn stage_vars_come_before_sprite_fields() {
        let program = Program {
            stage: SpriteDef {
                is_stage: true,
                variables: vec![VarDef { name: "score".into() }],
                ..sprite("Stage", &[])
            },
            sprites: vec![sprite("Cat", &["x", "y"])],
        };
        let symbols = SymbolTable::build(&program);
        assert_eq!(symbols.stage_vars["score"], 0);
        assert_eq!(symbols.field_base("Cat"), 1);
        assert_eq!(symbols.field_count("Cat"), 2);
        assert_eq!(symbols.resolve("Cat", "score"), Some(0));
        assert_eq!(symbols.resolve("Cat", "x"), Some(1));
    }
}
