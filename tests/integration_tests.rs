// tests/integration_tests.rs
//! Integration tests for the structural-transfer compiler and reduction engine

use structural_transfer::runtime::Token;
use structural_transfer::{
    compile_source, disassemble, grammar_source, link_sources, parser, CompilationError,
    ExecutionError, GrammarConfig, ReductionConfig, ReductionEngine, SymbolKind,
};

fn engine(rules: &str) -> ReductionEngine {
    let set = parser::parse(rules).expect("Failed to parse");
    ReductionEngine::new(&set, ReductionConfig::default()).expect("Failed to build engine")
}

fn top_level_types(engine: &ReductionEngine, input: &str) -> Vec<String> {
    let parse = engine.parse(input).expect("Failed to reduce");
    parse
        .nodes()
        .map(|token| match token {
            Token::Syntax(node) => node.node_type.clone(),
            Token::Lexical(entry) => entry.source_lemma.clone(),
            Token::Blank(_) => unreachable!(),
        })
        .collect()
}

#[test]
fn test_simple_rule_compiles_and_disassembles() {
    let rules = r#"
        num = sg pl ;
        NP -> 1: det.$num n.$num { 1 _1 2 } ;
    "#;

    let program = compile_source(rules).expect("Failed to compile");
    let listing = disassemble(&program.to_bytes()).expect("Failed to disassemble");

    assert_eq!(listing.max_pattern_len, 2);
    assert_eq!(listing.rule_count, 1);
    assert_eq!(listing.stages[0].attributes[0].0, "num");
    assert_eq!(listing.stages[0].categories, vec!["det", "n"]);
}

#[test]
fn test_every_rule_decodes_within_its_length() {
    let rules = r#"
        num = sg pl ;
        gen = m f ;
        #noun -> (n.*) ;
        NP.gen -> 1: det.$num %noun.$num { 2(num=1.num) _1 1(gen=$gen) }
                | 2: %noun { 1 } ;
        S -> 1: NP v { <s> 1 _ 2 } ;
    "#;

    let program = compile_source(rules).expect("Failed to compile");
    let listing = disassemble(&program.to_bytes()).expect("Failed to disassemble");

    assert_eq!(listing.rules().count(), listing.rule_count as usize);
    for rule in listing.rules() {
        let first = rule.instructions.first().expect("Rule has no instructions");
        let last = rule.instructions.last().expect("Rule has no instructions");
        assert_eq!(first.offset, 0);
        assert_eq!(last.offset + last.size, rule.length);
        assert_eq!(rule.instructions.iter().map(|i| i.size).sum::<usize>(), rule.length);
    }
}

#[test]
fn test_recompiling_is_byte_identical() {
    let rules = "num = sg pl ; NP -> 1: det.$num n.$num { 1 _1 2 } | 3: n { 1 } ;";

    let first = compile_source(rules).unwrap().to_bytes();
    let second = compile_source(rules).unwrap().to_bytes();
    assert_eq!(first, second);

    let first = grammar_source(rules, &GrammarConfig::default()).unwrap();
    let second = grammar_source(rules, &GrammarConfig::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_category_index_limit() {
    let mut rules = String::new();
    for i in 0..257 {
        rules.push_str(&format!("R{} -> 1: c{} {{ 1 }} ;\n", i, i));
    }

    match compile_source(&rules) {
        Err(CompilationError::FormatLimit { what, value }) => {
            assert_eq!(what, "category index");
            assert_eq!(value, 256);
        }
        other => panic!("Expected format limit, got {:?}", other),
    }
}

#[test]
fn test_full_category_table() {
    let mut rules = String::new();
    for i in 0..128 {
        rules.push_str(&format!("R{} -> 1: c{} c{} {{ 1 _1 2 }} ;\n", i, 2 * i, 2 * i + 1));
    }

    let program = compile_source(&rules).expect("Failed to compile");
    let listing = disassemble(&program.to_bytes()).expect("Failed to disassemble");

    assert_eq!(listing.stages[0].categories.len(), 256);
    assert_eq!(listing.stages[0].categories[255], "c255");
    let last = listing.rules().last().expect("No rules");
    assert_eq!(last.pattern, vec![254, 255]);
}

#[test]
fn test_position_limit() {
    let rules = r#"<transfer>
        <section-def-cats>
          <def-cat n="det"><cat-item tags="det.*"/></def-cat>
          <def-cat n="nom"><cat-item tags="n.*"/></def-cat>
        </section-def-cats>
        <section-def-attrs>
          <def-attr n="nbr"><attr-item tags="sg"/><attr-item tags="pl"/></def-attr>
        </section-def-attrs>
        <section-rules><rule><pattern><pattern-item n="det"/><pattern-item n="nom"/></pattern>
          <action><out><clip pos="300" part="nbr"/></out></action>
        </rule></section-rules>
      </transfer>"#;

    assert!(matches!(
        compile_source(rules),
        Err(CompilationError::FormatLimit { what: "position", value: 300 })
    ));
}

#[test]
fn test_list_length_limit() {
    let items: String = (0..256).map(|i| format!(r#"<list-item v="w{}"/>"#, i)).collect();
    let rules = format!(
        r#"<transfer>
             <section-def-cats><def-cat n="a"><cat-item tags="a"/></def-cat></section-def-cats>
             <section-def-lists><def-list n="big">{}</def-list></section-def-lists>
             <section-rules><rule><pattern><pattern-item n="a"/></pattern><action/></rule></section-rules>
           </transfer>"#,
        items
    );

    assert!(matches!(
        compile_source(&rules),
        Err(CompilationError::FormatLimit { what: "list length", value: 256 })
    ));
}

#[test]
fn test_macro_call_matches_inlined_body() {
    let document = |action: &str| {
        format!(
            r#"<transfer>
                 <section-def-cats>
                   <def-cat n="det"><cat-item tags="det.*"/></def-cat>
                   <def-cat n="nom"><cat-item tags="n.*"/></def-cat>
                 </section-def-cats>
                 <section-def-attrs>
                   <def-attr n="nbr"><attr-item tags="sg"/><attr-item tags="pl"/></def-attr>
                 </section-def-attrs>
                 <section-def-macros>
                   <def-macro n="copy_nbr" npar="2">
                     <let><clip pos="2" part="nbr"/><clip pos="1" part="nbr"/></let>
                   </def-macro>
                 </section-def-macros>
                 <section-rules>
                   <rule><pattern><pattern-item n="det"/><pattern-item n="nom"/></pattern>
                     <action>{}</action>
                   </rule>
                 </section-rules>
               </transfer>"#,
            action
        )
    };

    let called = document(r#"<call-macro n="copy_nbr"><with-param pos="2"/><with-param pos="1"/></call-macro>"#);
    let inlined = document(r#"<let><clip pos="1" part="nbr"/><clip pos="2" part="nbr"/></let>"#);

    assert_eq!(
        compile_source(&called).unwrap().to_bytes(),
        compile_source(&inlined).unwrap().to_bytes()
    );
}

#[test]
fn test_macro_call_with_distant_positions() {
    let document = |action: &str| {
        format!(
            r#"<transfer>
                 <section-def-cats>
                   <def-cat n="det"><cat-item tags="det.*"/></def-cat>
                   <def-cat n="nom"><cat-item tags="n.*"/></def-cat>
                 </section-def-cats>
                 <section-def-attrs>
                   <def-attr n="nbr"><attr-item tags="sg"/><attr-item tags="pl"/></def-attr>
                 </section-def-attrs>
                 <section-def-macros>
                   <def-macro n="copy_nbr" npar="2">
                     <let><clip pos="2" part="nbr"/><clip pos="1" part="nbr"/></let>
                   </def-macro>
                 </section-def-macros>
                 <section-rules>
                   <rule><pattern>
                       <pattern-item n="det"/><pattern-item n="nom"/><pattern-item n="det"/>
                       <pattern-item n="nom"/><pattern-item n="det"/><pattern-item n="nom"/>
                       <pattern-item n="det"/>
                     </pattern>
                     <action>{}</action>
                   </rule>
                 </section-rules>
               </transfer>"#,
            action
        )
    };

    let called = document(r#"<call-macro n="copy_nbr"><with-param pos="5"/><with-param pos="7"/></call-macro>"#);
    let inlined = document(r#"<let><clip pos="7" part="nbr"/><clip pos="5" part="nbr"/></let>"#);

    assert_eq!(
        compile_source(&called).unwrap().to_bytes(),
        compile_source(&inlined).unwrap().to_bytes()
    );
}

#[test]
fn test_link_three_stages() {
    let chunker = "num = sg pl ; NP -> 1: det n adj { 1 _1 2 _2 3 } ;";
    let interchunk = r#"<interchunk>
        <section-def-cats><def-cat n="SN"><cat-item tags="SN.*"/></def-cat></section-def-cats>
        <section-rules><rule><pattern><pattern-item n="SN"/></pattern><action/></rule></section-rules>
      </interchunk>"#;
    let postchunk = "S -> 1: NP { 1 } | 1: NP VP { 1 _1 2 } ;";

    let program = link_sources([chunker, interchunk, postchunk]).expect("Failed to link");
    let listing = disassemble(&program.to_bytes()).unwrap();

    assert_eq!(program.max_pattern_len, 3);
    assert_eq!(program.rule_count, 2);
    assert_eq!(listing.stages.len(), 3);
    assert_eq!(listing.stages[1].categories, vec!["SN"]);
}

#[test]
fn test_grammar_guards_and_output_switch() {
    let rules = r#"
        num = sg pl ;
        cnt = sg du ;
        NP -> 2: det.sg n { 2(num=1.num) _1 1 } ;
    "#;

    let grammar = grammar_source(rules, &GrammarConfig::default()).unwrap();

    assert!(grammar.contains(r#"$1->getVar(L"num") == L"sg" || $1->getVar(L"cnt") == L"sg""#));
    assert!(grammar.contains("%dprec 2"));
    assert!(grammar.contains("case 0:"));
}

#[test]
fn test_binding_consistency() {
    let engine = engine("num = sg pl ; NP -> 1: det.$num n.$num { 1 _1 2 } ;");

    assert_eq!(top_level_types(&engine, "^el<det><sg>$ ^gato<n><sg>$"), vec!["NP"]);
    assert_eq!(
        top_level_types(&engine, "^el<det><sg>$ ^gatos<n><pl>$"),
        vec!["el", "gatos"]
    );
}

#[test]
fn test_attribute_disjunction() {
    let engine = engine("num = sg pl ; NP -> 1: n.num { 1 } ;");

    assert_eq!(top_level_types(&engine, "^a<n><sg>$"), vec!["NP"]);
    assert_eq!(top_level_types(&engine, "^a<n><pl>$"), vec!["NP"]);
    assert_eq!(top_level_types(&engine, "^a<n><du>$"), vec!["a"]);
}

#[test]
fn test_cost_tie_goes_to_first_found() {
    let rules = "X -> 3: a b c { 1 _1 2 _2 3 } ; Y -> 1: b c { 1 _1 2 } ; W -> 1: Y { 1 } ;";
    let input = "^x<a>$ ^y<b>$ ^z<c>$";

    let engine = engine(rules);
    let parse = engine.parse(input).unwrap();
    assert_eq!(parse.cost(), 3.0);
    assert_eq!(top_level_types(&engine, input), vec!["X"]);
}

#[test]
fn test_cheaper_path_wins() {
    let rules = "X -> 3: a b c { 1 _1 2 _2 3 } ; Y -> 1: b c { 1 _1 2 } ; W -> 0.5: Y { 1 } ;";
    let input = "^x<a>$ ^y<b>$ ^z<c>$";

    let engine = engine(rules);
    let parse = engine.parse(input).unwrap();
    assert_eq!(parse.cost(), 2.5);
    assert_eq!(top_level_types(&engine, input), vec!["x", "W"]);
}

#[test]
fn test_updates_apply_in_declared_order() {
    let input = "^el<det><sg>$ ^gato<n><sg>$";

    let forward = engine("num = sg pl ; NP -> 1: det n { 1(num=pl) _1 2(num=1.num) } ;");
    assert_eq!(forward.process(input).unwrap(), "^el<det><pl>$ ^gato<n><pl>$");

    let backward = engine("num = sg pl ; NP -> 1: det n { 2(num=1.num) _1 1(num=pl) } ;");
    assert_eq!(backward.process(input).unwrap(), "^gato<n><sg>$ ^el<det><pl>$");
}

#[test]
fn test_variable_carries_value_between_updates() {
    let rules = r#"<transfer>
        <section-def-cats>
          <def-cat n="det"><cat-item tags="det.*"/></def-cat>
          <def-cat n="nom"><cat-item tags="n.*"/></def-cat>
        </section-def-cats>
        <section-def-attrs>
          <def-attr n="nbr"><attr-item tags="sg"/><attr-item tags="pl"/></def-attr>
        </section-def-attrs>
        <section-def-vars><def-var n="x"/></section-def-vars>
        <section-rules><rule><pattern><pattern-item n="det"/><pattern-item n="nom"/></pattern>
          <action>
            <let><var n="x"/><clip pos="1" part="nbr"/></let>
            <let><clip pos="2" part="nbr"/><var n="x"/></let>
            <out><clip pos="1" part="whole"/><b pos="1"/><clip pos="2" part="whole"/></out>
          </action>
        </rule></section-rules>
      </transfer>"#;

    let engine = engine(rules);
    assert_eq!(
        engine.process("^el<det><sg>$ ^gatos<n><pl>$").unwrap(),
        "^el<det><sg>$ ^gatos<n><sg>$"
    );
}

#[test]
fn test_output_units_are_inserted() {
    let engine = engine("num = sg pl ; PP.num -> 1: n.$num { 1 _ de@pr _ el@det.def.$num } ;");

    assert_eq!(
        engine.process("^gato<n><pl>/cat<n><pl>$").unwrap(),
        "^cat<n><pl>$ ^de<pr>$ ^el<det><def><pl>$"
    );
}

#[test]
fn test_output_and_retag_rules_shape_lexical_units() {
    let rules = r#"
        num = sg pl ;
        tense = pri ifi ;
        tense > tl_tense: pri pres, ifi past ;
        vblex: _.tl_tense.num ;
        S -> 1: n vblex { 2(num=1.num) _1 1 } ;
    "#;
    let engine = engine(rules);

    let output = engine
        .process("^gatos<n><pl>/cats<n><pl>$ ^come<vblex><pri><sg>/eat<vblex><pri><sg>$")
        .unwrap();
    assert_eq!(output, "^eat<vblex><pres><pl>$ ^cats<n><pl>$");
}

#[test]
fn test_lemma_elements_match_source_lemma() {
    let engine = engine("PP -> 1: de@pr n { 1 _1 2 } ;");

    assert_eq!(top_level_types(&engine, "^de<pr>/of<pr>$ ^casa<n>/house<n>$"), vec!["PP"]);
    assert_eq!(top_level_types(&engine, "^en<pr>/in<pr>$ ^casa<n>/house<n>$"), vec!["en", "casa"]);
}

#[test]
fn test_nested_nodes_render_through_parents() {
    let rules = r#"
        num = sg pl ;
        NP.num -> 1: det.$num n.$num { 1 _1 2 } ;
        S -> 1: NP v { 2(num=1.num) _1 1 } ;
    "#;
    let engine = engine(rules);

    let output = engine
        .process("^los<det><pl>/the<det><pl>$ ^gatos<n><pl>/cat<n><pl>$ ^come<v><sg>/eat<v><sg>$.")
        .unwrap();
    assert_eq!(output, "^eat<v><pl>$ ^the<det><pl>$ ^cat<n><pl>$.");
}

#[test]
fn test_reduction_is_deterministic() {
    let rules = "X -> 1: a b { 1 _1 2 } ; Y -> 1: b c { 1 _1 2 } ; Z -> 1: a Y { 1 _1 2 } | 1: X c { 1 _1 2 } ;";
    let input = "^x<a>$ ^y<b>$ ^z<c>$";

    let first = engine(rules).process(input).unwrap();
    let second = engine(rules).process(input).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_markup_rules_with_control_flow_are_not_reducible() {
    let rules = r#"<transfer>
        <section-def-cats><def-cat n="a"><cat-item tags="a"/></def-cat></section-def-cats>
        <section-def-vars><def-var n="v"/></section-def-vars>
        <section-rules><rule><pattern><pattern-item n="a"/></pattern><action>
          <choose><when><test><equal><var n="v"/><lit v="x"/></equal></test></when></choose>
        </action></rule></section-rules>
      </transfer>"#;
    let set = parser::parse(rules).unwrap();

    assert!(compile_source(rules).is_ok());
    assert!(matches!(
        ReductionEngine::new(&set, ReductionConfig::default()),
        Err(CompilationError::Unsupported { .. })
    ));
}

#[test]
fn test_reference_errors() {
    assert!(matches!(
        compile_source("NP -> 1: det { 2 } ;"),
        Err(CompilationError::Reference { kind: SymbolKind::Position, .. })
    ));
    assert!(matches!(
        compile_source("NP -> 1: det.nosuch { 1 } ;"),
        Err(CompilationError::Reference { kind: SymbolKind::Attribute, .. })
    ));
}

#[test]
fn test_malformed_stream() {
    let engine = engine("NP -> 1: n { 1 } ;");
    assert!(matches!(
        engine.process("^unterminated<n>"),
        Err(ExecutionError::Stream { .. })
    ));
}
