use crate::parsing::languages::TSLanguageConfig;

pub fn csharp_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["C#", "csharp", "c_sharp"],
        file_extensions: &["cs"],
        grammar: tree_sitter_c_sharp::language,
        symbol_query: vec![
            "(constructor_declaration name: (identifier) @constructor.name) @constructor.body"
                .to_owned(),
            "(method_declaration name: (identifier) @method.name) @method.body".to_owned(),
            "(namespace_declaration name: (identifier) @namespace.name) @namespace.body".to_owned(),
            "(namespace_declaration name: (qualified_name) @namespace.name) @namespace.body"
                .to_owned(),
            "(class_declaration name: (identifier) @class.name) @class.body".to_owned(),
            "(interface_declaration name: (identifier) @interface.name) @interface.body".to_owned(),
            "(enum_declaration name: (identifier) @enum.name) @enum.body".to_owned(),
            "(enum_member_declaration name: (identifier) @enum_member.name) @enum_member.body"
                .to_owned(),
            "(property_declaration name: (identifier) @property.name) @property.body".to_owned(),
            "(field_declaration
                (variable_declaration (variable_declarator (identifier) @field.name)))
            @field.body"
                .to_owned(),
        ],
    }
}
