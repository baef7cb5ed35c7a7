use super::*;

const FORM_PAGE: &str = r#"<!doctype html>
<html>
  <head><title>Form</title></head>
  <body>
    <form id="signup">
      <label for="agree" id="agree-label">Agree</label>
      <input type="checkbox" id="agree">
      <input type="radio" name="size" id="small" value="s" checked>
      <input type="radio" name="size" id="large" value="l">
      <input type="text" id="name" value="seed">
      <select id="colour">
        <option value="r">Red</option>
        <option value="g" selected>Green</option>
      </select>
      <button id="send">Send</button>
    </form>
    <p id="log"></p>
  </body>
</html>"#;

#[test]
fn document_accessors_reflect_the_parsed_tree() -> Result<()> {
    let mut t = TestPage::from_html(FORM_PAGE)?;
    t.assert_eval("document.title", "Form")?;
    t.assert_eval("document.readyState", "complete")?;
    t.assert_eval("document.body.tagName", "BODY")?;
    t.assert_eval("document.documentElement.tagName", "HTML")?;
    t.assert_eval("document.getElementById('name').value", "seed")?;
    t.assert_eval("document.querySelectorAll('input').length", "4")?;
    t.assert_eval("document.getElementById('colour').value", "g")?;
    t.assert_eval("document.getElementById('colour').selectedIndex", "1")?;
    t.assert_eval("document.querySelector('#small').checked", "true")?;
    t.assert_eval("document.getElementById('send').type", "submit")?;
    t.assert_eval("document.getElementById('name').form.id", "signup")?;
    t.assert_eval("window.innerWidth + 'x' + window.innerHeight", "800x600")?;
    Ok(())
}

#[test]
fn element_mutation_updates_text_and_markup() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        const list = document.createElement('ul');
        list.id = 'items';
        for (const label of ['one', 'two']) {
          const li = document.createElement('li');
          li.textContent = label;
          list.appendChild(li);
        }
        document.body.append(list);
        list.insertBefore(document.createElement('li'), list.firstChild);
        list.firstElementChild.innerHTML = '<b>zero</b> &amp; more';
        debug(list.children.length + ':' + list.textContent);
        debug(list.firstElementChild.outerHTML);
        list.lastElementChild.remove();
        debug(document.querySelectorAll('#items li').length);
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![
            Signal::Debug("3:zero & moreonetwo".into()),
            Signal::Debug("<li><b>zero</b> &amp; more</li>".into()),
            Signal::Debug("2".into()),
            Signal::Pass,
        ]
    );
    Ok(())
}

#[test]
fn attributes_classes_dataset_and_inline_style() -> Result<()> {
    let mut t = TestPage::from_html(
        r#"<div id="box" class="card" data-user-id="7" style="color: red"></div>"#,
    )?;
    let signals = t.run(
        r#"
        const box = $('#box');
        box.classList.add('active', 'wide');
        box.classList.remove('card');
        box.classList.toggle('wide');
        box.dataset.state = 'open';
        box.style.backgroundColor = '#00ff00';
        box.style.color = '';
        box.setAttribute('aria-label', 'Box');
        debug(box.className);
        debug(box.dataset.userId + ':' + box.getAttribute('data-state'));
        debug(box.getAttribute('style'));
        debug(String(box.hasAttribute('aria-label')) + box.classList.contains('active'));
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![
            Signal::Debug("active".into()),
            Signal::Debug("7:open".into()),
            Signal::Debug("background-color: #00ff00;".into()),
            Signal::Debug("truetrue".into()),
            Signal::Pass,
        ]
    );
    Ok(())
}

#[test]
fn events_run_capture_target_and_bubble_phases_in_order() -> Result<()> {
    let mut t = TestPage::from_html(
        r#"<div id="outer"><button id="inner">Go</button></div>
        <script>
          window.order = [];
          const outer = document.getElementById('outer');
          const inner = document.getElementById('inner');
          outer.addEventListener('click', () => order.push('outer-capture'), true);
          outer.addEventListener('click', () => order.push('outer-bubble'));
          inner.addEventListener('click', (e) => order.push('inner:' + e.eventPhase));
          document.addEventListener('click', () => order.push('document'));
          inner.addEventListener('click', () => order.push('once'), { once: true });
        </script>"#,
    )?;
    let signals = t.run(
        r#"
        $('#inner').click();
        $('#inner').click();
        debug(window.order.join(','));
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![
            Signal::Debug(
                "outer-capture,inner:2,once,outer-bubble,document,outer-capture,inner:2,outer-bubble,document"
                    .into()
            ),
            Signal::Pass,
        ]
    );
    Ok(())
}

#[test]
fn stop_propagation_and_prevent_default_are_honoured() -> Result<()> {
    let mut t = TestPage::from_html(
        r#"<div id="wrap"><a id="link" href="/x">x</a></div>
        <script>
          window.reachedWrap = false;
          document.getElementById('wrap').addEventListener('click', () => { reachedWrap = true; });
          document.getElementById('link').addEventListener('click', (e) => {
            e.preventDefault();
            e.stopPropagation();
          });
        </script>"#,
    )?;
    let signals = t.run(
        r#"
        const event = ev('click');
        const notCancelled = $('#link').dispatchEvent(event);
        debug(`${notCancelled}|${event.defaultPrevented}|${window.reachedWrap}`);
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![Signal::Debug("false|true|false".into()), Signal::Pass]
    );
    Ok(())
}

#[test]
fn checkbox_radio_and_label_clicks_toggle_state_and_fire_change() -> Result<()> {
    let mut t = TestPage::from_html(FORM_PAGE)?;
    let signals = t.run(
        r#"
        const changes = [];
        $('#agree').addEventListener('change', (e) => changes.push('agree:' + e.target.checked));
        $('#large').addEventListener('change', () => changes.push('large'));
        $('#agree-label').click();
        $('#large').click();
        debug(changes.join(','));
        debug(`${$('#agree').checked}|${$('#small').checked}|${$('#large').checked}`);
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![
            Signal::Debug("agree:true,large".into()),
            Signal::Debug("true|false|true".into()),
            Signal::Pass,
        ]
    );
    Ok(())
}

#[test]
fn cancelled_checkbox_click_restores_previous_state() -> Result<()> {
    let mut t = TestPage::from_html(FORM_PAGE)?;
    let signals = t.run(
        r#"
        $('#agree').addEventListener('click', (e) => e.preventDefault());
        $('#agree').click();
        debug(String($('#agree').checked));
        pass();
        "#,
    );
    assert_eq!(signals, vec![Signal::Debug("false".into()), Signal::Pass]);
    Ok(())
}

#[test]
fn submit_button_fires_cancelable_submit_on_its_form() -> Result<()> {
    let mut t = TestPage::from_html(FORM_PAGE)?;
    let signals = t.run(
        r#"
        let submitted = 0;
        $('#signup').addEventListener('submit', (e) => {
          submitted++;
          e.preventDefault();
          $('#log').textContent = 'Thanks ' + $('#name').value;
        });
        $('#name').value = 'Ada';
        $('#send').click();
        debug(submitted + ':' + $('#log').textContent);
        pass();
        "#,
    );
    assert_eq!(signals, vec![Signal::Debug("1:Thanks Ada".into()), Signal::Pass]);
    Ok(())
}

#[test]
fn disabled_controls_ignore_clicks() -> Result<()> {
    let mut t = TestPage::from_html(r#"<button id="b" disabled>b</button>"#)?;
    let signals = t.run(
        r#"
        let clicks = 0;
        $('#b').addEventListener('click', () => clicks++);
        $('#b').click();
        $('#b').disabled = false;
        $('#b').click();
        debug(clicks);
        pass();
        "#,
    );
    assert_eq!(signals, vec![Signal::Debug("1".into()), Signal::Pass]);
    Ok(())
}

#[test]
fn inline_handlers_and_handler_properties_both_fire() -> Result<()> {
    let mut t = TestPage::from_html(
        r#"<button id="b" onclick="this.dataset.inline = 'yes'">b</button>
        <input id="field">"#,
    )?;
    let signals = t.run(
        r#"
        $('#field').oninput = (e) => { e.target.dataset.seen = e.target.value; };
        $('#field').value = 'typed';
        $('#field').dispatchEvent(ev('input'));
        $('#b').click();
        debug($('#b').dataset.inline + ':' + $('#field').dataset.seen);
        pass();
        "#,
    );
    assert_eq!(signals, vec![Signal::Debug("yes:typed".into()), Signal::Pass]);
    Ok(())
}

#[test]
fn focus_and_blur_track_the_active_element() -> Result<()> {
    let mut t = TestPage::from_html(r#"<input id="a"><input id="b">"#)?;
    let signals = t.run(
        r#"
        const seen = [];
        $('#a').addEventListener('blur', () => seen.push('blur-a'));
        $('#b').addEventListener('focus', () => seen.push('focus-b'));
        document.body.addEventListener('focusin', (e) => seen.push('in-' + e.target.id));
        $('#a').focus();
        $('#b').focus();
        debug(seen.join(',') + '|' + document.activeElement.id);
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![Signal::Debug("in-a,blur-a,focus-b,in-b|b".into()), Signal::Pass]
    );
    Ok(())
}

#[test]
fn listener_exceptions_are_reported_without_aborting_dispatch() -> Result<()> {
    let mut t = TestPage::from_html(r#"<button id="b">b</button>"#)?;
    let signals = t.run(
        r#"
        let after = false;
        $('#b').addEventListener('click', () => { throw new Error('listener broke'); });
        $('#b').addEventListener('click', () => { after = true; });
        $('#b').click();
        if (after) { pass(); } else { fail('second listener skipped'); }
        "#,
    );
    assert_eq!(signals.len(), 2);
    assert!(matches!(&signals[0], Signal::Debug(msg) if msg.contains("listener broke")));
    assert_eq!(signals[1], Signal::Pass);
    Ok(())
}

#[test]
fn dom_content_loaded_and_load_fire_during_page_load() -> Result<()> {
    let mut t = TestPage::from_html(
        r#"<p id="state"></p>
        <script>
          const state = document.getElementById('state');
          state.textContent = document.readyState;
          document.addEventListener('DOMContentLoaded', () => { state.textContent += ',dom:' + document.readyState; });
          window.addEventListener('load', () => { state.textContent += ',load:' + document.readyState; });
        </script>"#,
    )?;
    t.assert_eval("$('#state').textContent", "loading,dom:interactive,load:complete")?;
    Ok(())
}

#[test]
fn missing_html_head_and_body_tags_are_implied() -> Result<()> {
    let mut t = TestPage::from_html("<!doctype html><title>Hi</title><h1>Hi</h1>")?;
    t.assert_eval("document.title", "Hi")?;
    t.assert_eval("document.documentElement.children.length", "2")?;
    t.assert_eval("document.head.firstElementChild.tagName", "TITLE")?;
    t.assert_eval("$('body h1').textContent", "Hi")?;
    let signals = t.run("if (document.body && $('body h1')) pass(); else fail('no body');");
    assert_eq!(signals, vec![Signal::Pass]);
    Ok(())
}

#[test]
fn explicit_skeleton_tags_are_reused_and_stray_content_moves_to_body() -> Result<()> {
    let mut t = TestPage::from_html(
        r#"<html lang="en"><head><meta charset="utf-8">stray</head>
        <body class="main"><p>one</p></body><p>two</p></html>"#,
    )?;
    t.assert_eval(
        "$$('html').length + ':' + $$('head').length + ':' + $$('body').length",
        "1:1:1",
    )?;
    t.assert_eval("document.documentElement.getAttribute('lang')", "en")?;
    t.assert_eval("document.body.className", "main")?;
    t.assert_eval("document.head.children.length", "1")?;
    t.assert_eval("$$('body p').length", "2")?;
    t.assert_eval("document.body.textContent.trim().startsWith('stray')", "true")?;
    Ok(())
}

#[test]
fn deeply_nested_markup_loads_and_stays_queryable() -> Result<()> {
    let depth = 20_000;
    let html = format!(
        "<!doctype html><body>{}<span id=\"leaf\">deep</span>{}</body>",
        "<div>".repeat(depth),
        "</div>".repeat(depth)
    );
    let mut t = TestPage::from_html(&html)?;
    t.assert_eval("$$('div').length", &depth.to_string())?;
    t.assert_eval("$('div').textContent", "deep")?;
    t.assert_eval("css($('#leaf')).display", "inline")?;
    t.assert_eval("$('div').outerHTML.length", &(11 * depth + 27).to_string())?;
    t.assert_eval("$('div').cloneNode(true).querySelector('#leaf').id", "leaf")?;
    Ok(())
}
