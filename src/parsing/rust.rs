use crate::parsing::languages::TSLanguageConfig;

pub fn rust_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["Rust", "rust"],
        file_extensions: &["rs"],
        grammar: tree_sitter_rust::language,
        // method patterns come before the plain function pattern so impl and
        // trait functions resolve as methods
        symbol_query: vec![
            "(impl_item body: (declaration_list
                (function_item name: (identifier) @method.name) @method.body))"
                .to_owned(),
            "(trait_item body: (declaration_list
                (function_item name: (identifier) @method.name) @method.body))"
                .to_owned(),
            "(function_item name: (identifier) @function.name) @function.body".to_owned(),
            "(mod_item name: (identifier) @namespace.name) @namespace.body".to_owned(),
            "(struct_item name: (type_identifier) @class.name) @class.body".to_owned(),
            "(trait_item name: (type_identifier) @interface.name) @interface.body".to_owned(),
            "(enum_item name: (type_identifier) @enum.name) @enum.body".to_owned(),
            "(enum_variant name: (identifier) @enum_member.name) @enum_member.body".to_owned(),
            "(field_declaration name: (field_identifier) @field.name) @field.body".to_owned(),
        ],
    }
}
