use crate::parsing::languages::TSLanguageConfig;

pub fn javascript_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["Javascript", "JSX", "javascript", "jsx"],
        file_extensions: &["js", "jsx", "mjs"],
        grammar: tree_sitter_javascript::language,
        symbol_query: vec![
            "(method_definition name: (property_identifier) @method.name) @method.body".to_owned(),
            "(function_declaration name: (identifier) @function.name) @function.body".to_owned(),
            "(generator_function_declaration name: (identifier) @function.name) @function.body"
                .to_owned(),
            // const f = () => {} declarations are functions in all but syntax
            "(lexical_declaration
                (variable_declarator
                    name: (identifier) @function.name
                    value: (arrow_function)))
            @function.body"
                .to_owned(),
            "(class_declaration name: (identifier) @class.name) @class.body".to_owned(),
            "(field_definition property: (property_identifier) @field.name) @field.body".to_owned(),
        ],
    }
}
