use super::*;
use crate::css::{ComputedStyle, Stylesheet, normalize_color, parse_style_declarations};
use crate::html::parse_html;

const STYLED_PAGE: &str = r#"<!doctype html>
<html>
  <head>
    <link rel="stylesheet" href="css/main.css">
    <style>
      .card { padding: 4px 8px; }
      #hero.card { color: #336699; }
      p { color: blue !important; }
    </style>
  </head>
  <body>
    <section id="hero" class="card" style="color: red">
      <h1>Title</h1>
      <p class="lead">Lead</p>
    </section>
    <span hidden id="ghost">hidden</span>
  </body>
</html>"#;

const MAIN_CSS: &str = r#"
/* site styles */
body { font-size: 20px; }
h1 { font-size: 2em; font-weight: bold; }
.card { background-color: rgb(255, 255, 0); margin: 0 auto; }
@media (max-width: 10px) { h1 { color: green; } }
"#;

fn styled() -> Result<TestPage> {
    TestPage::from_files(&[("index.html", STYLED_PAGE), ("css/main.css", MAIN_CSS)])
}

#[test]
fn computed_style_resolves_the_cascade() -> Result<()> {
    let mut t = styled()?;
    // Inline beats the id selector.
    t.assert_eval("css($('#hero')).color", "rgb(255, 0, 0)")?;
    t.assert_eval("css($('#hero')).backgroundColor", "rgb(255, 255, 0)")?;
    t.assert_eval("css($('#hero')).getPropertyValue('padding-left')", "8px")?;
    t.assert_eval("css($('#hero')).marginLeft", "auto")?;
    // !important beats inheritance from the inline color.
    t.assert_eval("css($('p')).color", "rgb(0, 0, 255)")?;
    Ok(())
}

#[test]
fn computed_style_inherits_and_resolves_relative_lengths() -> Result<()> {
    let mut t = styled()?;
    t.assert_eval("css($('h1')).fontSize", "40px")?;
    t.assert_eval("css($('h1')).fontWeight", "700")?;
    t.assert_eval("css($('.lead')).fontSize", "20px")?;
    t.assert_eval("css($('h1')).color", "rgb(255, 0, 0)")?;
    Ok(())
}

#[test]
fn computed_style_defaults_follow_element_kind() -> Result<()> {
    let mut t = styled()?;
    t.assert_eval("css($('section')).display", "block")?;
    t.assert_eval("css($('#ghost')).display", "none")?;
    t.assert_eval("getComputedStyle($('h1')).display", "block")?;
    Ok(())
}

#[test]
fn css_rejects_non_elements() -> Result<()> {
    let mut t = styled()?;
    let signals = t.run("css(null);\npass();");
    assert_eq!(signals.len(), 2);
    assert!(matches!(&signals[0], Signal::Debug(msg) if msg.starts_with("TypeError")));
    assert_eq!(signals[1], Signal::Fail(crate::page::SCRIPT_ERROR_REASON.into()));
    Ok(())
}

#[test]
fn selector_engine_supports_combinators_and_pseudo_classes() -> Result<()> {
    let mut t = TestPage::from_html(
        r#"<ul id="menu">
             <li class="item">a</li>
             <li class="item active"><a href="/b" data-kind="x">b</a></li>
             <li class="item">c</li>
           </ul>
           <input type="checkbox" checked id="c1"><input type="checkbox" id="c2">"#,
    )?;
    t.assert_eval("$$('#menu > li').length", "3")?;
    t.assert_eval("$('li:nth-child(2)').className", "item active")?;
    t.assert_eval("$('li:last-child').textContent", "c")?;
    t.assert_eval("$('.item.active a[data-kind=\"x\"]').textContent", "b")?;
    t.assert_eval("$('.active + li').textContent", "c")?;
    t.assert_eval("$$('li:not(.active)').length", "2")?;
    t.assert_eval("$$('input:checked').length", "1")?;
    t.assert_eval("$('a').closest('ul').id", "menu")?;
    t.assert_eval("$('li', $('#menu')).textContent", "a")?;
    t.assert_eval("$('.missing')", "null")?;
    Ok(())
}

#[test]
fn invalid_selectors_throw_syntax_errors() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        try { $$('div[[['); } catch (e) { debug(e.name); }
        pass();
        "#,
    );
    assert_eq!(signals, vec![Signal::Debug("SyntaxError".into()), Signal::Pass]);
    Ok(())
}

#[test]
fn stylesheet_parser_skips_at_rules_and_comments() {
    let sheet = Stylesheet::parse(MAIN_CSS);
    assert_eq!(sheet.rule_count(), 3);
}

#[test]
fn style_declarations_keep_important_flags_and_functions() {
    let decls =
        parse_style_declarations("color: red !important; background: url(a;b.png); ;margin:0");
    assert_eq!(decls.len(), 3);
    assert_eq!(decls[0].name, "color");
    assert!(decls[0].important);
    assert_eq!(decls[1].value, "url(a;b.png)");
    assert_eq!(decls[2].name, "margin");
}

#[test]
fn colors_normalize_to_rgb_notation() {
    assert_eq!(normalize_color("#fff").as_deref(), Some("rgb(255, 255, 255)"));
    assert_eq!(normalize_color("rgba(0, 0, 0, 0.5)").as_deref(), Some("rgba(0, 0, 0, 0.5)"));
}

#[test]
fn computed_style_is_available_without_a_page() -> Result<()> {
    let parsed = parse_html(r#"<div id="x" style="width: 10px"></div>"#)?;
    let sheet = Stylesheet::parse("div { height: 5px; }");
    let node = parsed
        .dom
        .get_element_by_id("x")
        .ok_or_else(|| Error::HtmlParse("missing #x".into()))?;
    let style = ComputedStyle::for_node(&parsed.dom, &sheet, node)
        .ok_or_else(|| Error::HtmlParse("no style".into()))?;
    assert_eq!(style.get("width"), "10px");
    assert_eq!(style.get("height"), "5px");
    assert_eq!(style.get("display"), "block");
    Ok(())
}
